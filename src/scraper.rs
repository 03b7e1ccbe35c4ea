use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::FetchFailure;
use crate::parser;

const CATALOG_PATH: &str = "/products.json";
const CATALOG_FALLBACK_PATH: &str = "/collections/all/products.json";
const COLLECTIONS_PATH: &str = "/collections.json";
const SITEMAP_PATH: &str = "/sitemap.xml";
const HOMEPAGE_PATH: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Catalog,
    Collections,
    Sitemap,
    Homepage,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 4] = [
        EndpointKind::Catalog,
        EndpointKind::Collections,
        EndpointKind::Sitemap,
        EndpointKind::Homepage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EndpointKind::Catalog => "catalog",
            EndpointKind::Collections => "collections",
            EndpointKind::Sitemap => "sitemap",
            EndpointKind::Homepage => "homepage",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheme + host (+ port) of a storefront, e.g. `https://shop.example.com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRoot {
    base: String,
    host: String,
    port: Option<u16>,
}

impl StoreRoot {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            bail!("Store URL is empty");
        }
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };
        let url = Url::parse(&with_scheme).with_context(|| format!("Invalid store URL: {}", input))?;
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            bail!("Unsupported scheme '{}' in store URL {}", scheme, input);
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .with_context(|| format!("Store URL has no host: {}", input))?
            .to_ascii_lowercase();
        let port = url.port();
        let base = match port {
            Some(p) => format!("{}://{}:{}", scheme, host, p),
            None => format!("{}://{}", scheme, host),
        };
        Ok(Self { base, host, port })
    }

    pub fn as_str(&self) -> &str {
        &self.base
    }

    pub fn join(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base, path_and_query)
    }

    /// Whether `url` points at this store's host.
    pub fn owns(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(&self.host)))
            .unwrap_or(false)
    }

    /// Filesystem-friendly store key: `www.example.com` → `www_example_com`.
    pub fn slug(&self) -> String {
        let host = self.host.replace('.', "_");
        match self.port {
            Some(p) => format!("{}_{}", host, p),
            None => host,
        }
    }
}

impl fmt::Display for StoreRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)
    }
}

/// Raw bytes of one endpoint, one closed variant per endpoint kind.
#[derive(Debug, Clone)]
pub enum RawPayload {
    Catalog { pages: Vec<String> },
    Collections { pages: Vec<String>, members: Vec<MemberListing> },
    Sitemap { documents: Vec<RawDocument> },
    Homepage { html: String },
}

impl RawPayload {
    pub fn document_count(&self) -> usize {
        match self {
            RawPayload::Catalog { pages } => pages.len(),
            RawPayload::Collections { pages, members } => {
                pages.len() + members.iter().map(|m| m.pages.len()).sum::<usize>()
            }
            RawPayload::Sitemap { documents } => documents.len(),
            RawPayload::Homepage { .. } => 1,
        }
    }
}

/// Product listing pages of a single collection.
#[derive(Debug, Clone)]
pub struct MemberListing {
    pub handle: String,
    pub pages: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RawDocument {
    pub url: String,
    pub body: String,
}

/// A successful endpoint fetch plus what it took to get it.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub payload: RawPayload,
    pub url: String,
    pub requests: u32,
    pub notes: Vec<String>,
}

/// Enforces a minimum delay between consecutive requests of one endpoint fetch.
struct RateGate {
    interval: Duration,
    last: Option<Instant>,
}

impl RateGate {
    fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                tokio::time::sleep(self.interval - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Per-fetch state, owned by a single endpoint fetch.
struct Session {
    kind: EndpointKind,
    gate: RateGate,
    requests: u32,
    notes: Vec<String>,
}

enum AttemptError {
    Transient {
        status: Option<u16>,
        reason: String,
        retry_after: Option<Duration>,
    },
    Permanent {
        status: Option<u16>,
        reason: String,
    },
}

pub struct Fetcher {
    client: reqwest::Client,
    max_retries: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    interval: Duration,
    page_limit: usize,
    max_pages: usize,
    max_child_sitemaps: usize,
    max_member_fetches: usize,
}

impl Fetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            max_retries: settings.max_retries,
            base_backoff: Duration::from_millis(settings.base_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            interval: settings.min_request_interval(),
            page_limit: settings.page_limit,
            max_pages: settings.max_pages,
            max_child_sitemaps: settings.max_child_sitemaps,
            max_member_fetches: settings.max_collection_member_fetches,
        })
    }

    /// Fetch one endpoint of the store. Independent fetches share nothing but the client.
    pub async fn fetch(&self, root: &StoreRoot, kind: EndpointKind) -> Result<Fetched, FetchFailure> {
        let mut session = Session {
            kind,
            gate: RateGate::new(self.interval),
            requests: 0,
            notes: Vec::new(),
        };

        let (payload, url) = match kind {
            EndpointKind::Catalog => self.fetch_catalog(root, &mut session).await?,
            EndpointKind::Collections => self.fetch_collections(root, &mut session).await?,
            EndpointKind::Sitemap => self.fetch_sitemap(root, &mut session).await?,
            EndpointKind::Homepage => {
                let url = root.join(HOMEPAGE_PATH);
                let html = self.get_with_retry(&mut session, &url).await?;
                (RawPayload::Homepage { html }, url)
            }
        };

        info!(
            endpoint = %kind,
            requests = session.requests,
            documents = payload.document_count(),
            "Fetched {}",
            url
        );
        Ok(Fetched {
            payload,
            url,
            requests: session.requests,
            notes: session.notes,
        })
    }

    async fn fetch_catalog(
        &self,
        root: &StoreRoot,
        session: &mut Session,
    ) -> Result<(RawPayload, String), FetchFailure> {
        let primary = root.join(CATALOG_PATH);
        match self.fetch_pages(session, root, CATALOG_PATH, "products").await {
            Ok(pages) => Ok((RawPayload::Catalog { pages }, primary)),
            Err(primary_err) => {
                warn!("Catalog unavailable at {} ({}), trying fallback path", primary, primary_err);
                let fallback = root.join(CATALOG_FALLBACK_PATH);
                match self.fetch_pages(session, root, CATALOG_FALLBACK_PATH, "products").await {
                    Ok(pages) => {
                        session
                            .notes
                            .push(format!("catalog served by fallback path after: {}", primary_err));
                        Ok((RawPayload::Catalog { pages }, fallback))
                    }
                    Err(fallback_err) => {
                        warn!("Catalog fallback failed too: {}", fallback_err);
                        Err(primary_err)
                    }
                }
            }
        }
    }

    async fn fetch_collections(
        &self,
        root: &StoreRoot,
        session: &mut Session,
    ) -> Result<(RawPayload, String), FetchFailure> {
        let url = root.join(COLLECTIONS_PATH);
        let pages = self.fetch_pages(session, root, COLLECTIONS_PATH, "collections").await?;

        let handles: Vec<String> = pages
            .iter()
            .flat_map(|body| parser::collections::listed_handles(body))
            .filter(|h| is_safe_handle(h))
            .collect();
        if handles.len() > self.max_member_fetches {
            session.notes.push(format!(
                "member listings fetched for {} of {} collections",
                self.max_member_fetches,
                handles.len()
            ));
        }

        let mut members = Vec::new();
        for handle in handles.into_iter().take(self.max_member_fetches) {
            let path = format!("/collections/{}/products.json", handle);
            match self.fetch_pages(session, root, &path, "products").await {
                Ok(pages) => members.push(MemberListing { handle, pages }),
                Err(e) => {
                    debug!("Member listing for collection {} unavailable: {}", handle, e);
                    session
                        .notes
                        .push(format!("member listing for '{}' unavailable: {}", handle, e));
                }
            }
        }

        Ok((RawPayload::Collections { pages, members }, url))
    }

    async fn fetch_sitemap(
        &self,
        root: &StoreRoot,
        session: &mut Session,
    ) -> Result<(RawPayload, String), FetchFailure> {
        let url = root.join(SITEMAP_PATH);
        let body = self.get_with_retry(session, &url).await?;
        let children = parser::sitemap::child_sitemaps(&body);
        let mut documents = vec![RawDocument { url: url.clone(), body }];

        if let Some(children) = children {
            info!("Sitemap index lists {} child sitemaps", children.len());
            let (children, off_host): (Vec<String>, Vec<String>) =
                children.into_iter().partition(|child| root.owns(child));
            if !off_host.is_empty() {
                warn!("Ignoring {} child sitemaps outside {}", off_host.len(), root);
                session.notes.push(format!(
                    "skipped {} child sitemaps on other hosts: {}",
                    off_host.len(),
                    off_host.join(", ")
                ));
            }
            if children.len() > self.max_child_sitemaps {
                session.notes.push(format!(
                    "fetched {} of {} child sitemaps",
                    self.max_child_sitemaps,
                    children.len()
                ));
            }
            for child in children.into_iter().take(self.max_child_sitemaps) {
                match self.get_with_retry(session, &child).await {
                    Ok(body) => documents.push(RawDocument { url: child, body }),
                    Err(e) => session
                        .notes
                        .push(format!("child sitemap {} unavailable: {}", child, e)),
                }
            }
        }

        Ok((RawPayload::Sitemap { documents }, url))
    }

    /// Walk `?limit=&page=` pages until a short page or the page cap.
    async fn fetch_pages(
        &self,
        session: &mut Session,
        root: &StoreRoot,
        path: &str,
        items_key: &str,
    ) -> Result<Vec<String>, FetchFailure> {
        let mut pages = Vec::new();
        for page in 1..=self.max_pages {
            let url = root.join(&format!("{}?limit={}&page={}", path, self.page_limit, page));
            match self.get_with_retry(session, &url).await {
                Ok(body) => {
                    let items = listed_item_count(&body, items_key);
                    pages.push(body);
                    if items < self.page_limit {
                        return Ok(pages);
                    }
                }
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    warn!("Pagination of {} stopped at page {}: {}", path, page, e);
                    session
                        .notes
                        .push(format!("pagination stopped at page {}: {}", page, e));
                    return Ok(pages);
                }
            }
        }
        session
            .notes
            .push(format!("page cap of {} reached for {}", self.max_pages, path));
        Ok(pages)
    }

    async fn get_with_retry(&self, session: &mut Session, url: &str) -> Result<String, FetchFailure> {
        let mut attempt = 0u32;
        loop {
            session.gate.wait().await;
            session.requests += 1;

            match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err(AttemptError::Permanent { status, reason }) => {
                    return Err(FetchFailure::Permanent {
                        endpoint: session.kind,
                        url: url.to_string(),
                        status,
                        reason,
                    });
                }
                Err(AttemptError::Transient { status, reason, retry_after }) => {
                    if attempt >= self.max_retries {
                        return Err(FetchFailure::Transient {
                            endpoint: session.kind,
                            url: url.to_string(),
                            status,
                            attempts: attempt + 1,
                            reason,
                        });
                    }
                    let backoff = self.backoff(attempt, retry_after);
                    warn!(
                        "Transient failure on {} ({}) (attempt {}/{}), backing off {:.1}s",
                        url,
                        reason,
                        attempt + 1,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = self.base_backoff.saturating_mul(2u32.saturating_pow(attempt));
        exp.max(retry_after.unwrap_or_default()).min(self.max_backoff)
    }

    async fn get_once(&self, url: &str) -> Result<String, AttemptError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() || e.is_redirect() {
                AttemptError::Permanent { status: None, reason: e.to_string() }
            } else {
                AttemptError::Transient { status: None, reason: e.to_string(), retry_after: None }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response.text().await.map_err(|e| AttemptError::Transient {
                status: Some(status.as_u16()),
                reason: format!("body read failed: {}", e),
                retry_after: None,
            });
        }

        if is_transient_status(status) {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(AttemptError::Transient {
                status: Some(status.as_u16()),
                reason: format!("HTTP {}", status),
                retry_after,
            });
        }

        Err(AttemptError::Permanent {
            status: Some(status.as_u16()),
            reason: format!("HTTP {}", status),
        })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Length of the top-level `items_key` array; 0 when the body is not such JSON.
fn listed_item_count(body: &str, items_key: &str) -> usize {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get(items_key).and_then(|items| items.as_array()).map(Vec::len))
        .unwrap_or(0)
}

fn is_safe_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal HTTP/1.1 server serving canned responses by path.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Clone)]
    pub struct Canned {
        pub status: u16,
        pub body: String,
        pub headers: Vec<(String, String)>,
    }

    pub fn ok(body: impl Into<String>) -> Canned {
        Canned { status: 200, body: body.into(), headers: Vec::new() }
    }

    pub fn status(code: u16) -> Canned {
        Canned { status: code, body: String::new(), headers: Vec::new() }
    }

    /// Routes map `path?query` to responses served in order; the last one repeats.
    pub struct TestServer {
        pub base: String,
        routes: Arc<Mutex<HashMap<String, Vec<Canned>>>>,
        hits: Arc<Mutex<Vec<String>>>,
    }

    impl TestServer {
        pub async fn start(routes: Vec<(&str, Vec<Canned>)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let routes: HashMap<String, Vec<Canned>> = routes
                .into_iter()
                .map(|(p, r)| (p.to_string(), r))
                .collect();
            let routes = Arc::new(Mutex::new(routes));
            let routes_bg = Arc::clone(&routes);
            let hits = Arc::new(Mutex::new(Vec::new()));
            let hits_bg = Arc::clone(&hits);

            tokio::spawn(async move {
                loop {
                    let Ok((mut socket, _)) = listener.accept().await else { break };
                    let routes = Arc::clone(&routes_bg);
                    let hits = Arc::clone(&hits_bg);
                    tokio::spawn(async move {
                        let mut buf = Vec::new();
                        let mut chunk = [0u8; 1024];
                        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                            }
                        }
                        let request = String::from_utf8_lossy(&buf);
                        let path = request
                            .lines()
                            .next()
                            .and_then(|l| l.split_whitespace().nth(1))
                            .unwrap_or("/")
                            .to_string();
                        hits.lock().unwrap().push(path.clone());

                        let canned = {
                            let mut routes = routes.lock().unwrap();
                            match routes.get_mut(&path) {
                                Some(queue) if queue.len() > 1 => queue.remove(0),
                                Some(queue) if !queue.is_empty() => queue[0].clone(),
                                _ => status(404),
                            }
                        };
                        let mut head = format!(
                            "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n",
                            canned.status,
                            canned.body.len()
                        );
                        for (k, v) in &canned.headers {
                            head.push_str(&format!("{}: {}\r\n", k, v));
                        }
                        head.push_str("\r\n");
                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(canned.body.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
            });

            Self { base: format!("http://{}", addr), routes, hits }
        }

        /// Register a route once the server address is known.
        pub fn route(&self, path: &str, responses: Vec<Canned>) {
            self.routes.lock().unwrap().insert(path.to_string(), responses);
        }

        pub fn hits(&self) -> Vec<String> {
            self.hits.lock().unwrap().clone()
        }

        pub fn hit_count(&self, path: &str) -> usize {
            self.hits().iter().filter(|p| p.as_str() == path).count()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_server::{ok, status, Canned, TestServer};
    use super::*;

    fn fast_settings() -> Settings {
        Settings {
            base_backoff_ms: 1,
            max_backoff_ms: 5,
            min_request_interval_ms: 0,
            page_limit: 2,
            ..Settings::default()
        }
    }

    fn products_page(ids: &[u64]) -> String {
        let items: Vec<String> = ids
            .iter()
            .map(|id| format!(r#"{{"id":{},"title":"P{}","variants":[]}}"#, id, id))
            .collect();
        format!(r#"{{"products":[{}]}}"#, items.join(","))
    }

    #[test]
    fn store_root_normalizes_input() {
        let root = StoreRoot::parse("  Shop.Example.com/collections/all?x=1 ").unwrap();
        assert_eq!(root.as_str(), "https://shop.example.com");
        assert_eq!(root.slug(), "shop_example_com");
        assert_eq!(root.join("/products.json"), "https://shop.example.com/products.json");

        let with_port = StoreRoot::parse("http://127.0.0.1:8080/").unwrap();
        assert_eq!(with_port.as_str(), "http://127.0.0.1:8080");
        assert_eq!(with_port.slug(), "127_0_0_1_8080");
    }

    #[test]
    fn store_root_rejects_bad_input() {
        assert!(StoreRoot::parse("").is_err());
        assert!(StoreRoot::parse("ftp://example.com").is_err());
        assert!(StoreRoot::parse("https://").is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let fetcher = Fetcher::new(&Settings {
            base_backoff_ms: 100,
            max_backoff_ms: 350,
            ..Settings::default()
        })
        .unwrap();
        assert_eq!(fetcher.backoff(0, None), Duration::from_millis(100));
        assert_eq!(fetcher.backoff(1, None), Duration::from_millis(200));
        assert_eq!(fetcher.backoff(2, None), Duration::from_millis(350));
        assert_eq!(
            fetcher.backoff(0, Some(Duration::from_millis(300))),
            Duration::from_millis(300)
        );
    }

    #[tokio::test]
    async fn catalog_walks_pages_until_short_page() {
        let server = TestServer::start(vec![
            ("/products.json?limit=2&page=1", vec![ok(products_page(&[1, 2]))]),
            ("/products.json?limit=2&page=2", vec![ok(products_page(&[3]))]),
        ])
        .await;
        let root = StoreRoot::parse(&server.base).unwrap();
        let fetcher = Fetcher::new(&fast_settings()).unwrap();

        let fetched = fetcher.fetch(&root, EndpointKind::Catalog).await.unwrap();
        match fetched.payload {
            RawPayload::Catalog { pages } => assert_eq!(pages.len(), 2),
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(fetched.requests, 2);
        assert_eq!(server.hit_count("/products.json?limit=2&page=3"), 0);
    }

    #[tokio::test]
    async fn transient_status_is_retried() {
        let server = TestServer::start(vec![(
            "/",
            vec![status(503), ok("<html>ok</html>")],
        )])
        .await;
        let root = StoreRoot::parse(&server.base).unwrap();
        let fetcher = Fetcher::new(&fast_settings()).unwrap();

        let fetched = fetcher.fetch(&root, EndpointKind::Homepage).await.unwrap();
        assert!(matches!(fetched.payload, RawPayload::Homepage { ref html } if html.contains("ok")));
        assert_eq!(server.hit_count("/"), 2);
    }

    #[tokio::test]
    async fn rate_limit_honours_retry_after_and_recovers() {
        let limited = Canned {
            status: 429,
            body: String::new(),
            headers: vec![("Retry-After".into(), "0".into())],
        };
        let server = TestServer::start(vec![("/", vec![limited, ok("<html></html>")])]).await;
        let root = StoreRoot::parse(&server.base).unwrap();
        let fetcher = Fetcher::new(&fast_settings()).unwrap();

        assert!(fetcher.fetch(&root, EndpointKind::Homepage).await.is_ok());
        assert_eq!(server.hit_count("/"), 2);
    }

    #[tokio::test]
    async fn permanent_status_is_not_retried() {
        let server = TestServer::start(vec![("/sitemap.xml", vec![status(403)])]).await;
        let root = StoreRoot::parse(&server.base).unwrap();
        let fetcher = Fetcher::new(&fast_settings()).unwrap();

        let err = fetcher.fetch(&root, EndpointKind::Sitemap).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.status(), Some(403));
        assert!(err.to_string().starts_with("sitemap fetch"));
        assert_eq!(server.hit_count("/sitemap.xml"), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let server = TestServer::start(vec![("/", vec![status(500)])]).await;
        let root = StoreRoot::parse(&server.base).unwrap();
        let fetcher = Fetcher::new(&Settings { max_retries: 2, ..fast_settings() }).unwrap();

        let err = fetcher.fetch(&root, EndpointKind::Homepage).await.unwrap_err();
        assert!(matches!(err, FetchFailure::Transient { attempts: 3, .. }));
        assert_eq!(server.hit_count("/"), 3);
    }

    #[tokio::test]
    async fn catalog_falls_back_to_all_collection() {
        let server = TestServer::start(vec![
            ("/products.json?limit=2&page=1", vec![status(404)]),
            (
                "/collections/all/products.json?limit=2&page=1",
                vec![ok(products_page(&[9]))],
            ),
        ])
        .await;
        let root = StoreRoot::parse(&server.base).unwrap();
        let fetcher = Fetcher::new(&fast_settings()).unwrap();

        let fetched = fetcher.fetch(&root, EndpointKind::Catalog).await.unwrap();
        assert!(fetched.url.ends_with("/collections/all/products.json"));
        assert_eq!(fetched.notes.len(), 1);
    }

    #[tokio::test]
    async fn catalog_failure_reports_primary_error() {
        let server = TestServer::start(vec![]).await;
        let root = StoreRoot::parse(&server.base).unwrap();
        let fetcher = Fetcher::new(&fast_settings()).unwrap();

        let err = fetcher.fetch(&root, EndpointKind::Catalog).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("/products.json"));
    }

    #[tokio::test]
    async fn sitemap_index_pulls_children() {
        let server = TestServer::start(vec![]).await;
        let index = format!(
            r#"<?xml version="1.0"?><sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
<sitemap><loc>{0}/sitemap_products_1.xml</loc></sitemap>
<sitemap><loc>{0}/sitemap_pages_1.xml</loc></sitemap>
</sitemapindex>"#,
            server.base
        );
        server.route("/sitemap.xml", vec![ok(index)]);
        server.route(
            "/sitemap_products_1.xml",
            vec![ok(format!(
                "<urlset><url><loc>{}/products/a</loc></url></urlset>",
                server.base
            ))],
        );
        let root = StoreRoot::parse(&server.base).unwrap();
        let fetcher = Fetcher::new(&fast_settings()).unwrap();

        let fetched = fetcher.fetch(&root, EndpointKind::Sitemap).await.unwrap();
        match fetched.payload {
            RawPayload::Sitemap { documents } => {
                assert_eq!(documents.len(), 2);
                assert!(documents[1].url.ends_with("/sitemap_products_1.xml"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        // The pages child is missing: a note, not a failure.
        assert_eq!(fetched.notes.len(), 1);
        assert_eq!(fetched.requests, 3);
    }

    #[tokio::test]
    async fn collections_fetch_member_listings() {
        let listing = r#"{"collections":[{"id":1,"handle":"shoes","title":"Shoes"},{"id":2,"handle":"bad/handle","title":"X"}]}"#;
        let server = TestServer::start(vec![
            ("/collections.json?limit=2&page=1", vec![ok(listing)]),
            ("/collections.json?limit=2&page=2", vec![ok(r#"{"collections":[]}"#)]),
            ("/collections/shoes/products.json?limit=2&page=1", vec![ok(products_page(&[5]))]),
        ])
        .await;
        let root = StoreRoot::parse(&server.base).unwrap();
        let fetcher = Fetcher::new(&fast_settings()).unwrap();

        let fetched = fetcher.fetch(&root, EndpointKind::Collections).await.unwrap();
        match fetched.payload {
            RawPayload::Collections { pages, members } => {
                assert_eq!(pages.len(), 2);
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].handle, "shoes");
                assert_eq!(members[0].pages.len(), 1);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn member_listings_walk_pages() {
        let listing = r#"{"collections":[{"id":1,"handle":"shoes","title":"Shoes"}]}"#;
        let server = TestServer::start(vec![
            ("/collections.json?limit=2&page=1", vec![ok(listing)]),
            ("/collections/shoes/products.json?limit=2&page=1", vec![ok(products_page(&[5, 6]))]),
            ("/collections/shoes/products.json?limit=2&page=2", vec![ok(products_page(&[7]))]),
        ])
        .await;
        let root = StoreRoot::parse(&server.base).unwrap();
        let fetcher = Fetcher::new(&fast_settings()).unwrap();

        let fetched = fetcher.fetch(&root, EndpointKind::Collections).await.unwrap();
        let RawPayload::Collections { pages, members } = &fetched.payload else {
            panic!("unexpected payload {:?}", fetched.payload)
        };
        assert_eq!(members[0].pages.len(), 2);
        assert_eq!(fetched.payload.document_count(), 3);
        assert_eq!(server.hit_count("/collections/shoes/products.json?limit=2&page=3"), 0);

        let records = parser::collections::normalize(pages, members).unwrap();
        assert_eq!(records.collections[0].product_ids, vec![5, 6, 7]);
        assert_eq!(records.collections[0].product_count, Some(3));
    }

    #[test]
    fn store_root_owns_only_its_host() {
        let root = StoreRoot::parse("shop.example.com").unwrap();
        assert!(root.owns("https://SHOP.example.com/sitemap_products_1.xml"));
        assert!(root.owns("http://shop.example.com/x.xml"));
        assert!(!root.owns("https://cdn.other.net/sitemap.xml"));
        assert!(!root.owns("not a url"));
    }

    #[tokio::test]
    async fn off_host_child_sitemaps_are_skipped() {
        let server = TestServer::start(vec![]).await;
        let index = format!(
            "<sitemapindex><sitemap><loc>{}/sitemap_pages_1.xml</loc></sitemap><sitemap><loc>https://elsewhere.example.net/sitemap.xml</loc></sitemap></sitemapindex>",
            server.base
        );
        server.route("/sitemap.xml", vec![ok(index)]);
        server.route("/sitemap_pages_1.xml", vec![ok("<urlset></urlset>")]);
        let root = StoreRoot::parse(&server.base).unwrap();
        let fetcher = Fetcher::new(&fast_settings()).unwrap();

        let fetched = fetcher.fetch(&root, EndpointKind::Sitemap).await.unwrap();
        assert_eq!(fetched.payload.document_count(), 2);
        assert_eq!(fetched.requests, 2);
        assert_eq!(fetched.notes.len(), 1);
        assert!(fetched.notes[0].contains("elsewhere.example.net"));
    }
}
