use std::sync::LazyLock;

use regex::Regex;

use crate::model::SignalCategory::{App, Pixel, Platform};
use crate::model::{SignalCategory, TechSignal};
use crate::parser::text::{ceil_boundary, collapse_whitespace, floor_boundary};

/// Bytes of markup kept on each side of a match.
const SNIPPET_CONTEXT: usize = 40;

/// A third-party platform and the markup that gives it away.
///
/// `needles` are lowercase substrings matched against the lowercased page;
/// `patterns` are case-insensitive regular expressions.
struct Fingerprint {
    name: &'static str,
    category: SignalCategory,
    needles: &'static [&'static str],
    patterns: &'static [&'static str],
}

const fn fp(
    name: &'static str,
    category: SignalCategory,
    needles: &'static [&'static str],
    patterns: &'static [&'static str],
) -> Fingerprint {
    Fingerprint { name, category, needles, patterns }
}

static FINGERPRINTS: &[Fingerprint] = &[
    fp("Shopify", Platform, &["cdn.shopify.com", "myshopify.com", "shopify.theme"], &[]),
    // Apps
    fp("Shop Pay", App, &["shop-pay", "shop_pay", "shopify-payment-button"], &[]),
    fp("Klaviyo", App, &["klaviyo"], &[]),
    fp("Omnisend", App, &["omnisend"], &[]),
    fp("Mailchimp", App, &["chimpstatic.com", "list-manage.com"], &[]),
    fp("Yotpo", App, &["yotpo"], &[]),
    fp("Judge.me", App, &["judge.me", "judgeme"], &[]),
    fp("Stamped.io", App, &["stamped.io"], &[]),
    fp("Recharge", App, &["rechargecdn", "rechargepayments", "rechargeapps"], &[]),
    fp("Bold Subscriptions", App, &["boldapps.net", "bold-subscriptions"], &[]),
    fp("Gorgias", App, &["gorgias"], &[]),
    fp("Intercom", App, &["widget.intercom.io", "intercomcdn"], &[]),
    fp("Zendesk", App, &["zdassets.com", "zopim"], &[]),
    fp("Crisp", App, &["client.crisp.chat"], &[]),
    fp("Shogun", App, &["getshogun", "shogun-frontend"], &[]),
    fp("PageFly", App, &["pagefly"], &[]),
    fp("GemPages", App, &["gempages", "gem-page"], &[]),
    // Pixels
    fp(
        "Google Analytics",
        Pixel,
        &["google-analytics.com/analytics.js"],
        &[r#"gtag\(\s*['"]config['"]\s*,\s*['"](G|UA)-[A-Z0-9-]+"#],
    ),
    fp("Google Tag Manager", Pixel, &["googletagmanager.com/gtm.js"], &[r"\bGTM-[A-Z0-9]{4,}\b"]),
    fp("Facebook Pixel", Pixel, &["connect.facebook.net", "fbq("], &[]),
    fp("Snap Pixel", Pixel, &["sc-static.net/scevent", "snaptr("], &[]),
    fp("TikTok Pixel", Pixel, &["analytics.tiktok.com", "ttq.load"], &[]),
    fp("Hotjar", Pixel, &["static.hotjar.com"], &[]),
    fp("Pinterest Tag", Pixel, &["s.pinimg.com/ct/core.js", "pintrk("], &[]),
];

static COMPILED_PATTERNS: LazyLock<Vec<Vec<Regex>>> = LazyLock::new(|| {
    FINGERPRINTS
        .iter()
        .map(|f| {
            f.patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){}", p)).unwrap())
                .collect()
        })
        .collect()
});

static THEME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)Shopify\.theme\s*=\s*\{[^}]*?"name"\s*:\s*"([^"]+)""#).unwrap()
});

/// Platforms detected in homepage markup, in table order, theme last.
pub fn detect(html: &str) -> Vec<TechSignal> {
    let lowered = html.to_ascii_lowercase();
    let mut signals = Vec::new();

    for (fingerprint, patterns) in FINGERPRINTS.iter().zip(COMPILED_PATTERNS.iter()) {
        let needle_hit = fingerprint
            .needles
            .iter()
            .filter_map(|n| lowered.find(n).map(|start| (start, start + n.len())));
        let pattern_hit = patterns
            .iter()
            .filter_map(|re| re.find(html).map(|m| (m.start(), m.end())));

        if let Some((start, end)) = needle_hit.chain(pattern_hit).min() {
            signals.push(TechSignal {
                name: fingerprint.name.to_string(),
                category: fingerprint.category,
                evidence_snippet: snippet(html, start, end),
            });
        }
    }

    if let Some(caps) = THEME_RE.captures(html) {
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
        let name = caps[1].trim();
        // A theme named after a detected platform would duplicate that signal.
        if !name.is_empty() && !signals.iter().any(|s| s.name.eq_ignore_ascii_case(name)) {
            signals.push(TechSignal {
                name: name.to_string(),
                category: SignalCategory::Theme,
                evidence_snippet: snippet(html, whole.0, whole.1),
            });
        }
    }

    signals
}

fn snippet(html: &str, start: usize, end: usize) -> String {
    let from = floor_boundary(html, start.saturating_sub(SNIPPET_CONTEXT));
    let to = ceil_boundary(html, end.saturating_add(SNIPPET_CONTEXT));
    collapse_whitespace(&html[from..to])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(signals: &[TechSignal]) -> Vec<&str> {
        signals.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn detects_fixture_platforms() {
        let html = std::fs::read_to_string("tests/fixtures/homepage.html").unwrap();
        let signals = detect(&html);
        assert_eq!(
            names(&signals),
            vec!["Shopify", "Klaviyo", "Google Analytics", "Facebook Pixel", "Dawn"]
        );
        assert_eq!(signals[0].category, SignalCategory::Platform);
        assert_eq!(signals[1].category, SignalCategory::App);
        assert_eq!(signals[2].category, SignalCategory::Pixel);
        assert_eq!(signals[4].category, SignalCategory::Theme);
        assert!(signals[1].evidence_snippet.to_lowercase().contains("klaviyo"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let signals = detect(r#"<script src="https://STATIC.KLAVIYO.COM/onsite.js"></script>"#);
        assert_eq!(names(&signals), vec!["Klaviyo"]);
        let signals = detect("<script>gtag('CONFIG', 'g-XYZ123');</script>");
        assert_eq!(names(&signals), vec!["Google Analytics"]);
    }

    #[test]
    fn plain_page_has_no_signals() {
        assert!(detect("<html><body><h1>Hello</h1></body></html>").is_empty());
        assert!(detect("").is_empty());
    }

    #[test]
    fn theme_named_like_a_platform_is_not_repeated() {
        let html = r#"<link href="//cdn.shopify.com/s/a.css"><script>Shopify.theme = {"name":"Shopify","id":1};</script>"#;
        let signals = detect(html);
        assert_eq!(names(&signals), vec!["Shopify"]);
        assert_eq!(signals[0].category, SignalCategory::Platform);
    }

    #[test]
    fn snippet_stays_on_char_boundaries() {
        let html = format!("{}yotpo{}", "é".repeat(30), "ü".repeat(30));
        let signals = detect(&html);
        assert_eq!(names(&signals), vec!["Yotpo"]);
        assert!(signals[0].evidence_snippet.contains("yotpo"));
    }
}
