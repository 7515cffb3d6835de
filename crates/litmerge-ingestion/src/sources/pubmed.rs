//! PubMed / PMC E-utilities client.
//!
//! Endpoints used:
//!   esearch: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi
//!   efetch:  https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi
//!
//! `db=pmc` fetches return JATS and carry full-text bodies; `db=pubmed`
//! fetches return MEDLINE citations (title, authors, DOI) only.

use async_trait::async_trait;
use litmerge_common::{LitmergeError, Result, SandboxClient as Client};
use quick_xml::events::Event;
use quick_xml::Reader;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::jats::parse_articles;
use super::{clean_doi, clean_pmcid, SourceFetcher};
use crate::models::{Author, PaperBody, SourceKind, SourceRecord};

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL:  &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PubMedDatabase {
    Pmc,
    Pubmed,
}

impl PubMedDatabase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PubMedDatabase::Pmc    => "pmc",
            PubMedDatabase::Pubmed => "pubmed",
        }
    }
}

pub struct PubMedClient {
    client: Client,
    database: PubMedDatabase,
    api_key: Option<SecretString>,
    max_results: usize,
}

impl PubMedClient {
    pub fn new(client: Client, database: PubMedDatabase, api_key: Option<SecretString>, max_results: usize) -> Self {
        Self { client, database, api_key, max_results }
    }

    pub fn database(&self) -> PubMedDatabase {
        self.database
    }

    fn base_params(&self, db: PubMedDatabase) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", db.as_str().to_string())];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.expose_secret().to_string()));
        }
        params
    }

    async fn efetch(&self, db: PubMedDatabase, ids: &[String]) -> Result<String> {
        let mut params = self.base_params(db);
        params.push(("id", ids.join(",")));
        if db == PubMedDatabase::Pubmed {
            params.push(("retmode", "xml".to_string()));
        }
        self.client.get_text(EFETCH_URL, &params).await
    }
}

#[async_trait]
impl SourceFetcher for PubMedClient {
    fn name(&self) -> &'static str {
        match self.database {
            PubMedDatabase::Pmc    => "pmc",
            PubMedDatabase::Pubmed => "pubmed",
        }
    }

    /// Search by author (`<name>[au]`) and return source ids.
    #[instrument(skip(self))]
    async fn search_by_author(&self, name: &str) -> Result<Vec<String>> {
        let mut params = self.base_params(self.database);
        params.push(("term", format!("{name}[au]")));
        params.push(("retmax", self.max_results.to_string()));

        let xml = self.client.get_text(ESEARCH_URL, &params).await?;
        let ids = parse_esearch(&xml).map_err(|e| match e {
            LitmergeError::NoResults(msg) => LitmergeError::NoResults(format!("author \"{name}\": {msg}")),
            other => other,
        })?;
        info!(db = self.database.as_str(), n = ids.len(), "esearch returned ids");
        Ok(ids)
    }

    #[instrument(skip(self, ids), fields(n = ids.len()))]
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<SourceRecord>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let xml = self.efetch(self.database, ids).await?;
        match self.database {
            PubMedDatabase::Pmc => Ok(parse_articles(&xml)?.into_iter().map(|a| a.record).collect()),
            PubMedDatabase::Pubmed => parse_pubmed_xml(&xml),
        }
    }

    #[instrument(skip(self, ids), fields(n = ids.len()))]
    async fn fetch_bodies_by_ids(&self, ids: &[String]) -> Result<Vec<PaperBody>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let xml = self.efetch(PubMedDatabase::Pmc, ids).await?;
        let bodies: Vec<PaperBody> = parse_articles(&xml)?
            .into_iter()
            .map(|a| a.body)
            .filter(|b| !b.sections.is_empty())
            .collect();
        debug!(requested = ids.len(), bodies = bodies.len(), "Fetched PMC bodies");
        Ok(bodies)
    }
}

/// Parse an esearch response into ids.
///
/// `ErrorList` / `WarningList`, `Count` 0 or an empty `IdList` are all
/// reported as `NoResults`.
pub fn parse_esearch(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut ids = Vec::new();
    let mut count: Option<u64> = None;
    let mut problems: Vec<String> = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(e.name().as_ref().to_vec()),
            Ok(Event::End(_)) => { stack.pop(); }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().trim().to_string();
                match stack.last().map(|s| s.as_slice()) {
                    Some(b"Id") if within(&stack, b"IdList") => ids.push(text),
                    // Only the top-level Count; TranslationStack carries its own.
                    Some(b"Count") if stack.len() == 2 => count = text.parse().ok(),
                    Some(_) if within(&stack, b"ErrorList") || within(&stack, b"WarningList") => problems.push(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(LitmergeError::Xml(format!("esearch parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    if !problems.is_empty() {
        return Err(LitmergeError::NoResults(problems.join("; ")));
    }
    if count == Some(0) || ids.is_empty() {
        return Err(LitmergeError::NoResults("no papers found".to_string()));
    }
    Ok(ids)
}

fn within(stack: &[Vec<u8>], name: &[u8]) -> bool {
    stack.iter().any(|s| s.as_slice() == name)
}

/// Parse PubMed XML (efetch, `retmode=xml`) into source records.
/// Handles the <PubmedArticleSet><PubmedArticle> structure.
pub fn parse_pubmed_xml(xml: &str) -> Result<Vec<SourceRecord>> {
    let mut papers = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // State machine for XML parsing
    let mut current: Option<SourceRecord> = None;
    let mut in_pmid       = false;
    let mut in_title      = false;
    let mut in_abstract   = false;
    let mut in_author     = false;
    let mut in_last_name  = false;
    let mut in_fore_name  = false;
    let mut in_references = false;
    let mut eloc_doi      = false;
    let mut article_id_type: Option<String> = None;
    let mut current_last  = String::new();
    let mut current_fore  = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                match e.name().as_ref() {
                    b"PubmedArticle" => current = Some(SourceRecord::new(SourceKind::PubMed)),
                    b"PMID"          => in_pmid = true,
                    b"ArticleTitle"  => in_title = true,
                    b"AbstractText"  => in_abstract = true,
                    b"Author"        => { in_author = true; current_last.clear(); current_fore.clear(); }
                    b"LastName"      => in_last_name = true,
                    b"ForeName"      => in_fore_name = true,
                    b"ReferenceList" | b"CommentsCorrectionsList" => in_references = true,
                    b"ELocationID" => {
                        eloc_doi = e.attributes().flatten().any(|a| {
                            a.key.as_ref() == b"EIdType"
                                && a.unescape_value().is_ok_and(|v| v.eq_ignore_ascii_case("doi"))
                        });
                    }
                    b"ArticleId" if !in_references => {
                        article_id_type = e.attributes().flatten()
                            .find(|a| a.key.as_ref() == b"IdType")
                            .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if let Some(ref mut p) = current {
                    if in_pmid && !in_references && p.identifiers.pubmed_id.is_none() {
                        p.identifiers.pubmed_id = Some(text.clone());
                    }
                    if in_title     { p.title.push_str(&text); }
                    if in_abstract  {
                        let abs = p.abstract_text.get_or_insert_with(String::new);
                        if !abs.is_empty() { abs.push(' '); }
                        abs.push_str(&text);
                    }
                    if in_last_name { current_last = text.clone(); }
                    if in_fore_name { current_fore = text.clone(); }
                    if eloc_doi && p.identifiers.doi.is_none() {
                        p.identifiers.doi = clean_doi(&text);
                    }
                    match article_id_type.as_deref() {
                        Some("doi") if p.identifiers.doi.is_none() => p.identifiers.doi = clean_doi(&text),
                        Some("pmc") if p.identifiers.pmc_id.is_none() => p.identifiers.pmc_id = clean_pmcid(&text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                match e.name().as_ref() {
                    b"PMID"         => in_pmid = false,
                    b"ArticleTitle" => in_title = false,
                    b"AbstractText" => in_abstract = false,
                    b"LastName"     => in_last_name = false,
                    b"ForeName"     => in_fore_name = false,
                    b"ELocationID"  => eloc_doi = false,
                    b"ArticleId"    => article_id_type = None,
                    b"ReferenceList" | b"CommentsCorrectionsList" => in_references = false,
                    b"Author" => {
                        if in_author {
                            if let Some(ref mut p) = current {
                                let name = if current_fore.is_empty() {
                                    current_last.clone()
                                } else {
                                    format!("{} {}", current_fore, current_last)
                                };
                                if !name.trim().is_empty() {
                                    p.authors.push(Author { name, source_author_id: None });
                                }
                            }
                            in_author = false;
                        }
                    }
                    b"PubmedArticle" => {
                        if let Some(p) = current.take() {
                            if !p.title.is_empty() {
                                papers.push(p);
                            } else {
                                warn!("Skipping paper with empty title");
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(LitmergeError::Xml(format!("PubMed XML parse error: {e}")));
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(papers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_esearch_ids() {
        let xml = r#"<?xml version="1.0"?>
<eSearchResult><Count>2</Count><RetMax>2</RetMax><RetStart>0</RetStart>
<IdList><Id>11111</Id><Id>22222</Id></IdList>
<TranslationSet/><TranslationStack><TermSet><Term>smith j[au]</Term><Count>2</Count></TermSet></TranslationStack>
</eSearchResult>"#;
        assert_eq!(parse_esearch(xml).unwrap(), vec!["11111", "22222"]);
    }

    #[test]
    fn test_esearch_no_results_variants() {
        let zero = "<eSearchResult><Count>0</Count><IdList></IdList></eSearchResult>";
        let errors = "<eSearchResult><Count>0</Count><ErrorList><PhraseNotFound>nobody[au]</PhraseNotFound></ErrorList></eSearchResult>";
        let warning = "<eSearchResult><WarningList><OutputMessage>No items found.</OutputMessage></WarningList></eSearchResult>";
        for xml in [zero, errors, warning] {
            assert!(matches!(parse_esearch(xml), Err(LitmergeError::NoResults(_))), "{xml}");
        }
        match parse_esearch(errors) {
            Err(LitmergeError::NoResults(msg)) => assert!(msg.contains("nobody[au]")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_minimal_pubmed_xml() {
        let xml = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID>12345678</PMID>
      <Article>
        <ArticleTitle>Endometriosis and infertility</ArticleTitle>
        <ELocationID EIdType="pii">S0015-0282</ELocationID>
        <ELocationID EIdType="doi" ValidYN="Y">10.1016/J.FERTNSTERT.2020.01.001</ELocationID>
        <Abstract><AbstractText>Test abstract.</AbstractText></Abstract>
        <AuthorList>
          <Author><LastName>Smith</LastName><ForeName>John</ForeName></Author>
        </AuthorList>
      </Article>
      <CommentsCorrectionsList><CommentsCorrections><PMID>999</PMID></CommentsCorrections></CommentsCorrectionsList>
    </MedlineCitation>
    <PubmedData><ArticleIdList>
      <ArticleId IdType="pubmed">12345678</ArticleId>
      <ArticleId IdType="pmc">PMC7000001</ArticleId>
    </ArticleIdList></PubmedData>
  </PubmedArticle>
  <PubmedArticle><MedlineCitation><PMID>1</PMID><Article></Article></MedlineCitation></PubmedArticle>
</PubmedArticleSet>"#;

        let papers = parse_pubmed_xml(xml).unwrap();
        assert_eq!(papers.len(), 1);
        let p = &papers[0];
        assert_eq!(p.identifiers.pubmed_id.as_deref(), Some("12345678"));
        assert_eq!(p.identifiers.doi.as_deref(), Some("10.1016/j.fertnstert.2020.01.001"));
        assert_eq!(p.identifiers.pmc_id.as_deref(), Some("PMC7000001"));
        assert_eq!(p.title, "Endometriosis and infertility");
        assert_eq!(p.abstract_text.as_deref(), Some("Test abstract."));
        assert_eq!(p.authors[0].name, "John Smith");
        assert_eq!(p.source, SourceKind::PubMed);
    }

    #[tokio::test]
    #[ignore] // Requires network access to NCBI
    async fn test_live_pmc_search() {
        let client = Client::new("pmc").unwrap();
        let pmc = PubMedClient::new(client, PubMedDatabase::Pmc, None, 5);
        let ids = pmc.search_by_author("Becker CM").await.unwrap();
        assert!(!ids.is_empty());
        let records = pmc.fetch_by_ids(&ids).await.unwrap();
        assert!(!records.is_empty());
    }
}
