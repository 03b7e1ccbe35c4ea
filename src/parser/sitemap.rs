use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::NormalizationFailure;
use crate::model::{Anomaly, AnomalyKind, EntityKind, SitemapCategory, SitemapEntry};
use crate::scraper::{EndpointKind, RawDocument};

pub struct SitemapRecords {
    pub entries: Vec<SitemapEntry>,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    UrlSet,
    SitemapIndex,
    Other,
}

#[derive(Clone, Copy)]
enum Field {
    Loc,
    Lastmod,
    Other,
}

/// One `<url>` or `<sitemap>` element as read, before validation.
#[derive(Debug, Default)]
struct Record {
    ordinal: usize,
    loc: Option<String>,
    lastmod: Option<String>,
    problem: Option<String>,
}

impl Record {
    fn push_text(&mut self, field: Field, text: &str) {
        let slot = match field {
            Field::Loc => &mut self.loc,
            Field::Lastmod => &mut self.lastmod,
            Field::Other => return,
        };
        slot.get_or_insert_with(String::new).push_str(text);
    }

    /// Absolute http(s) location, or why the record has none.
    fn location(&self) -> Result<String, String> {
        if let Some(problem) = &self.problem {
            return Err(problem.clone());
        }
        let loc = self.loc.as_deref().map(str::trim).unwrap_or("");
        if loc.is_empty() {
            return Err("missing <loc>".to_string());
        }
        if !(loc.starts_with("http://") || loc.starts_with("https://")) {
            return Err(format!("location {:?} is not an absolute http(s) URL", loc));
        }
        Ok(loc.to_string())
    }
}

struct Scan {
    root: Option<Root>,
    records: Vec<Record>,
    error: Option<String>,
}

/// Read every `record_tag` element of a sitemap document.
///
/// Stops at the first XML syntax error but keeps what was read before it.
fn scan(xml: &str, record_tag: &[u8]) -> Scan {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().check_end_names = false;

    let mut buf = Vec::new();
    let mut root = None;
    let mut records = Vec::new();
    let mut current: Option<Record> = None;
    let mut field = Field::Other;
    // Nesting below the open record; only direct children carry <loc>/<lastmod>.
    let mut depth = 0usize;
    let mut ordinal = 0;
    let mut error = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if root.is_none() {
                    root = Some(root_kind(name));
                } else if name == record_tag {
                    if let Some(mut unclosed) = current.take() {
                        unclosed
                            .problem
                            .get_or_insert_with(|| "entry not closed before the next one".into());
                        records.push(unclosed);
                    }
                    ordinal += 1;
                    current = Some(Record { ordinal, ..Record::default() });
                    field = Field::Other;
                    depth = 0;
                } else if current.is_some() {
                    depth += 1;
                    field = match name {
                        b"loc" if depth == 1 => Field::Loc,
                        b"lastmod" if depth == 1 => Field::Lastmod,
                        _ => Field::Other,
                    };
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.local_name();
                let name = name.as_ref();
                if root.is_none() {
                    root = Some(root_kind(name));
                } else if name == record_tag && current.is_none() {
                    ordinal += 1;
                    records.push(Record {
                        ordinal,
                        problem: Some("empty entry".into()),
                        ..Record::default()
                    });
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(record) = current.as_mut() {
                    match e.unescape() {
                        Ok(text) => record.push_text(field, &text),
                        Err(err) => record.problem = Some(format!("unreadable text: {}", err)),
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(record) = current.as_mut() {
                    record.push_text(field, &String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == record_tag {
                    if let Some(record) = current.take() {
                        records.push(record);
                    }
                } else if current.is_some() {
                    depth = depth.saturating_sub(1);
                }
                field = Field::Other;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                error = Some(e.to_string());
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    if let Some(mut unclosed) = current.take() {
        unclosed
            .problem
            .get_or_insert_with(|| "entry not closed".into());
        records.push(unclosed);
    }

    Scan { root, records, error }
}

fn root_kind(name: &[u8]) -> Root {
    match name {
        b"urlset" => Root::UrlSet,
        b"sitemapindex" => Root::SitemapIndex,
        _ => Root::Other,
    }
}

/// Child sitemap locations when `xml` is a `<sitemapindex>`, `None` otherwise.
pub fn child_sitemaps(xml: &str) -> Option<Vec<String>> {
    let scan = scan(xml, b"sitemap");
    if scan.root != Some(Root::SitemapIndex) {
        return None;
    }
    Some(scan.records.iter().filter_map(|r| r.location().ok()).collect())
}

/// Classify a storefront URL by its path.
pub fn classify(url: &str) -> SitemapCategory {
    let after_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = after_scheme
        .find('/')
        .map(|i| &after_scheme[i..])
        .unwrap_or("/")
        .to_ascii_lowercase();

    if path.contains("/products/") {
        SitemapCategory::Product
    } else if path.contains("/collections/") {
        SitemapCategory::Collection
    } else if path.contains("/blogs/") {
        SitemapCategory::Blog
    } else if path.contains("/pages/") {
        SitemapCategory::Page
    } else {
        SitemapCategory::Unknown
    }
}

/// Entries of all fetched sitemap documents. The first document is the root sitemap.
pub fn normalize(documents: &[RawDocument]) -> Result<SitemapRecords, NormalizationFailure> {
    let mut entries = Vec::new();
    let mut anomalies = Vec::new();

    for (idx, doc) in documents.iter().enumerate() {
        let scan = scan(&doc.body, b"url");

        match scan.root {
            Some(Root::UrlSet) => {}
            Some(Root::SitemapIndex) if idx == 0 => continue,
            root if idx == 0 => {
                let reason = match (root, &scan.error) {
                    (None, Some(err)) => format!("sitemap is not readable XML: {}", err),
                    _ => "unsupported sitemap structure".to_string(),
                };
                return Err(NormalizationFailure::new(EndpointKind::Sitemap, reason));
            }
            _ => {
                anomalies.push(Anomaly::new(
                    EntityKind::Document,
                    doc.url.clone(),
                    AnomalyKind::MalformedSitemapDocument,
                    "child sitemap is not a <urlset>",
                ));
                continue;
            }
        }

        for record in &scan.records {
            match record.location() {
                Ok(url) => entries.push(SitemapEntry {
                    category: classify(&url),
                    url,
                    last_modified: record
                        .lastmod
                        .as_deref()
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from),
                }),
                Err(problem) => anomalies.push(Anomaly::new(
                    EntityKind::SitemapEntry,
                    format!("{}#{}", doc.url, record.ordinal),
                    AnomalyKind::MalformedSitemapEntry,
                    problem,
                )),
            }
        }

        if let Some(err) = scan.error {
            anomalies.push(Anomaly::new(
                EntityKind::Document,
                doc.url.clone(),
                AnomalyKind::MalformedSitemapDocument,
                format!("parsing stopped early: {}", err),
            ));
        }
    }

    Ok(SitemapRecords { entries, anomalies })
}
