//! Full-text link recovery for records whose primary link is a DOI landing page.
//!
//! The resolver follows the DOI redirect chain to the publisher page and scans
//! it for PDF links. A link is only accepted when exactly one distinct PDF
//! target is found; zero or several leave the record unresolved.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use litmerge_common::{LitmergeError, Result, SandboxClient as Client};
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

/// Links pointing back at the resolver never count as full text.
pub const DOI_RESOLVER_PREFIX: &str = "https://doi.org";

#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// The single full-text link reachable from `landing_url`, if any.
    async fn resolve(&self, landing_url: &str) -> Result<Option<String>>;
}

pub struct HttpLinkResolver {
    client: Client,
}

impl HttpLinkResolver {
    /// `publisher_domains` extends the client allowlist; the redirect target
    /// itself is fetched by the HTTP client without a second allowlist check.
    pub fn new(mut client: Client, publisher_domains: &[String]) -> Self {
        for domain in publisher_domains {
            client.allow_domain(domain);
        }
        Self { client }
    }
}

#[async_trait]
impl LinkResolver for HttpLinkResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, landing_url: &str) -> Result<Option<String>> {
        let (final_url, html) = match self.client.get_following(landing_url).await {
            Ok(page) => page,
            Err(LitmergeError::NoResults(_)) => return Ok(None),
            // A single publisher being down only affects this record.
            Err(LitmergeError::UpstreamUnavailable { message, .. }) => {
                return Err(LitmergeError::Other(anyhow::anyhow!(
                    "landing page {landing_url} unavailable: {message}"
                )));
            }
            Err(e) => return Err(e),
        };
        debug!(final_url = %final_url, bytes = html.len(), "Fetched landing page");
        Ok(pick_pdf_link(&html, &final_url))
    }
}

fn pdf_path_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.pdf(?:$|[?#])").ok()).as_ref()
}

fn onclick_target_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"location\.href\s*=\s*['"]([^'"]+)['"]"#).ok()).as_ref()
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Scan an HTML page for full-text PDF links and return the only distinct one.
///
/// Looks at `citation_pdf_url` meta tags, anchors, embeds and iframes, PDF
/// `link` elements and `location.href` buttons. Relative URLs are resolved
/// against `page_url`.
pub fn pick_pdf_link(html: &str, page_url: &str) -> Option<String> {
    let base = Url::parse(page_url).ok()?;
    let document = Html::parse_document(html);
    let pdf_path = pdf_path_pattern()?;

    let mut raw: Vec<(String, bool)> = Vec::new();

    if let Some(meta) = selector("meta[name='citation_pdf_url']") {
        for el in document.select(&meta) {
            if let Some(content) = el.value().attr("content") {
                raw.push((content.to_string(), true));
            }
        }
    }
    if let Some(links) = selector("a[href], link[type='application/pdf'][href]") {
        for el in document.select(&links) {
            if let Some(href) = el.value().attr("href") {
                let typed = el.value().attr("type") == Some("application/pdf");
                raw.push((href.to_string(), typed));
            }
        }
    }
    if let Some(embeds) = selector("embed[src], iframe[src]") {
        for el in document.select(&embeds) {
            if let Some(src) = el.value().attr("src") {
                let typed = el.value().attr("type") == Some("application/pdf");
                raw.push((src.to_string(), typed));
            }
        }
    }
    if let (Some(buttons), Some(onclick)) = (selector("button[onclick]"), onclick_target_pattern()) {
        for el in document.select(&buttons) {
            let Some(handler) = el.value().attr("onclick") else { continue };
            if let Some(target) = onclick.captures(handler).and_then(|c| c.get(1)) {
                raw.push((target.as_str().to_string(), false));
            }
        }
    }

    let mut found = BTreeSet::new();
    for (href, declared_pdf) in raw {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            continue;
        }
        let Ok(absolute) = base.join(href) else { continue };
        if !matches!(absolute.scheme(), "http" | "https") {
            continue;
        }
        let absolute = absolute.to_string();
        if absolute.starts_with(DOI_RESOLVER_PREFIX) {
            continue;
        }
        if declared_pdf || pdf_path.is_match(&absolute) {
            found.insert(absolute);
        }
    }

    if found.len() == 1 {
        found.into_iter().next()
    } else {
        debug!(candidates = found.len(), page_url, "No unique PDF link");
        None
    }
}
