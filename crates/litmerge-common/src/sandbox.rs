use rand::Rng;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;
use crate::error::LitmergeError;

/// Jittered delay applied before every outbound call.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Pacing {
    pub fn new(min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            min_delay: Duration::from_millis(min_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms.max(min_delay_ms)),
        }
    }

    /// No delay at all. Only meant for tests against local fixtures.
    pub fn none() -> Self {
        Self { min_delay: Duration::ZERO, max_delay: Duration::ZERO }
    }

    pub fn next_delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        if max <= min {
            return self.min_delay;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::new(1_000, 3_000)
    }
}

/// A paced HTTP client that only allows requests to approved domains.
///
/// Every request waits for the pacing delay and holds the client's gate for
/// its whole duration, so at most one call per client is ever in flight.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
    pacing: Pacing,
    gate: Arc<Mutex<()>>,
    service: String,
    headers: Vec<(String, String)>,
}

impl SandboxClient {
    /// Creates a new SandboxClient with the default allowlist of bibliographic and embedding domains.
    pub fn new(service: &str) -> Result<Self, LitmergeError> {
        let mut allowlist = HashSet::new();
        let domains = vec![
            "eutils.ncbi.nlm.nih.gov",           // PubMed / PMC
            "api.semanticscholar.org",           // Semantic Scholar
            "doi.org",                           // DOI landing pages
            "api.openai.com",                    // OpenAI embeddings
            "generativelanguage.googleapis.com", // Gemini embeddings
            "localhost",                         // Ollama local
            "127.0.0.1",                         // Localhost alt
        ];

        for d in domains {
            allowlist.insert(d.to_string());
        }

        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(60))
            .user_agent("litmerge/0.1 (research corpus)")
            .build()
            .map_err(|e| LitmergeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            allowlist,
            pacing: Pacing::default(),
            gate: Arc::new(Mutex::new(())),
            service: service.to_string(),
            headers: Vec::new(),
        })
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Header sent with every request, e.g. an API key.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Validates if a URL is permitted under the current sandbox policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                // Check exact match or if it's a subdomain of an allowed domain
                for allowed in &self.allowlist {
                    if host == allowed || host.ends_with(&format!(".{}", allowed)) {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn check(&self, url: &str) -> Result<(), LitmergeError> {
        if !self.is_allowed(url) {
            return Err(LitmergeError::Security(format!(
                "Network capabilities capped: domain not in allowlist for URL {}",
                url
            )));
        }
        Ok(())
    }

    /// GET a URL and return the body as text.
    pub async fn get_text<Q: Serialize + ?Sized>(&self, url: &str, query: &Q) -> Result<String, LitmergeError> {
        let (_, body) = self.send(self.prepare(reqwest::Method::GET, url)?.query(query), url).await?;
        Ok(body)
    }

    /// GET a URL and decode the JSON body.
    pub async fn get_json<T, Q>(&self, url: &str, query: &Q) -> Result<T, LitmergeError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let body = self.get_text(url, query).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// POST a JSON body, optionally with a bearer token, and decode the JSON response.
    pub async fn post_json<B, T>(&self, url: &str, body: &B, bearer: Option<&str>) -> Result<T, LitmergeError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut req = self.prepare(reqwest::Method::POST, url)?.json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let (_, text) = self.send(req, url).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// GET following redirects; returns the final URL together with the body.
    pub async fn get_following(&self, url: &str) -> Result<(String, String), LitmergeError> {
        self.send(self.prepare(reqwest::Method::GET, url)?, url).await
    }

    fn prepare(&self, method: reqwest::Method, url: &str) -> Result<reqwest::RequestBuilder, LitmergeError> {
        self.check(url)?;
        let mut req = self.client.request(method, url);
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        Ok(req)
    }

    async fn send(&self, req: reqwest::RequestBuilder, url: &str) -> Result<(String, String), LitmergeError> {
        let _in_flight = self.gate.lock().await;

        let delay = self.pacing.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        debug!(service = %self.service, url, "Outbound request");
        let resp = req.send().await.map_err(|e| self.classify_transport(e))?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() {
            warn!(service = %self.service, url, status = status.as_u16(), "Request failed");
            return Err(self.classify_status(status, url));
        }

        let body = resp.text().await.map_err(|e| self.classify_transport(e))?;
        Ok((final_url, body))
    }

    fn classify_transport(&self, err: reqwest::Error) -> LitmergeError {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            LitmergeError::upstream(&self.service, err.to_string())
        } else {
            LitmergeError::Http(err)
        }
    }

    fn classify_status(&self, status: StatusCode, url: &str) -> LitmergeError {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            LitmergeError::upstream(&self.service, format!("HTTP {} from {}", status.as_u16(), url))
        } else if status == StatusCode::NOT_FOUND {
            LitmergeError::NoResults(format!("{} returned 404 for {}", self.service, url))
        } else {
            LitmergeError::HttpStatus { status: status.as_u16(), url: url.to_string() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowlist_accepts_subdomains() {
        let client = SandboxClient::new("test").unwrap();
        assert!(client.is_allowed("https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi"));
        assert!(client.is_allowed("https://www.doi.org/10.1000/1"));
        assert!(!client.is_allowed("https://example.com/paper.pdf"));
        assert!(!client.is_allowed("not a url"));
    }

    #[test]
    fn test_blocked_domain_is_security_error() {
        let client = SandboxClient::new("test").unwrap();
        let err = client.check("https://evil.example.org/").unwrap_err();
        assert!(matches!(err, LitmergeError::Security(_)));
    }

    #[test]
    fn test_pacing_stays_within_bounds() {
        let pacing = Pacing::new(1_000, 3_000);
        for _ in 0..50 {
            let d = pacing.next_delay();
            assert!(d >= Duration::from_millis(1_000) && d <= Duration::from_millis(3_000));
        }
        assert_eq!(Pacing::none().next_delay(), Duration::ZERO);
    }

    #[test]
    fn test_status_classification() {
        let client = SandboxClient::new("pubmed").unwrap();
        assert!(client.classify_status(StatusCode::BAD_GATEWAY, "u").is_run_fatal());
        assert!(client.classify_status(StatusCode::TOO_MANY_REQUESTS, "u").is_run_fatal());
        assert!(matches!(
            client.classify_status(StatusCode::NOT_FOUND, "u"),
            LitmergeError::NoResults(_)
        ));
        assert!(matches!(
            client.classify_status(StatusCode::BAD_REQUEST, "u"),
            LitmergeError::HttpStatus { status: 400, .. }
        ));
    }
}
