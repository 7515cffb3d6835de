//! JATS (PMC `efetch`) article parser.
//!
//! Produces one `SourceRecord` and one `PaperBody` per `<article>`. The body
//! keeps the `sec` nesting as a `SectionNode` tree with one `TextUnit` per
//! `<p>` that sits directly in a `sec` (or directly in `body`, which becomes
//! a leading section).
//!
//! Paragraph text keeps inline formatting (`italic`, `bold`, `sup`, ...) and
//! drops every other child element, notably `<xref>` citation markers. Numeric
//! character references are left as written for the entity normaliser; only
//! the five predefined XML entities are decoded here.

use std::collections::BTreeMap;

use litmerge_common::{LitmergeError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use super::{clean_doi, clean_pmcid};
use crate::models::{Author, Fragment, PaperBody, PublicationDate, SectionNode, SourceKind, SourceRecord, TextUnit};
use crate::normalise::normalize;

/// Children of `<p>` whose text stays part of the paragraph.
const INLINE_ELEMENTS: &[&str] = &[
    "italic", "bold", "sup", "sub", "sc", "underline", "monospace", "roman", "sans-serif", "named-content", "styled-content",
];

#[derive(Debug, Clone)]
pub struct JatsArticle {
    pub record: SourceRecord,
    pub body: PaperBody,
}

#[derive(Debug)]
enum Capture {
    ArticleId(String),
    Title,
    Surname,
    GivenNames,
    Keyword,
    Year,
    Month,
    Day,
    Paragraph { attributes: BTreeMap<String, String>, had_markup: bool },
}

#[derive(Debug)]
struct Active {
    kind: Capture,
    /// Stack depth of the captured element (its index in `stack`).
    depth: usize,
    text: String,
}

#[derive(Debug, Default)]
struct PubDateDraft {
    pub_type: Option<String>,
    year: Option<String>,
    month: Option<String>,
    day: Option<String>,
}

#[derive(Debug, Default)]
struct AuthorDraft {
    surname: String,
    given: String,
}

#[derive(Debug)]
struct ArticleDraft {
    record: SourceRecord,
    body_paragraphs: Vec<TextUnit>,
    sections: Vec<SectionNode>,
    /// Open `sec` elements with their stack depth.
    open_sections: Vec<(usize, SectionNode)>,
    pub_dates: Vec<PubDateDraft>,
    open_date: Option<PubDateDraft>,
    open_author: Option<AuthorDraft>,
}

impl ArticleDraft {
    fn new() -> Self {
        Self {
            record: SourceRecord::new(SourceKind::Pmc),
            body_paragraphs: Vec::new(),
            sections: Vec::new(),
            open_sections: Vec::new(),
            pub_dates: Vec::new(),
            open_date: None,
            open_author: None,
        }
    }

    fn finish(mut self) -> JatsArticle {
        // Prefer epub / collection dates, else the first one with a year.
        let chosen = self
            .pub_dates
            .iter()
            .position(|d| matches!(d.pub_type.as_deref(), Some("epub") | Some("collection")) && d.year.is_some())
            .or_else(|| self.pub_dates.iter().position(|d| d.year.is_some()));
        if let Some(i) = chosen {
            let d = self.pub_dates.swap_remove(i);
            self.record.publication_date = d.year.map(|year| PublicationDate { year, month: d.month, day: d.day });
        }

        // Sections left open by truncated input still count.
        while let Some((_, sec)) = self.open_sections.pop() {
            attach_section(&mut self.open_sections, &mut self.sections, sec);
        }

        let mut sections = Vec::with_capacity(self.sections.len() + 1);
        if !self.body_paragraphs.is_empty() {
            sections.push(SectionNode { paragraphs: self.body_paragraphs, children: Vec::new() });
        }
        sections.extend(self.sections);

        let body = PaperBody { identifiers: self.record.identifiers.clone(), sections };
        JatsArticle { record: self.record, body }
    }
}

fn attach_section(open: &mut [(usize, SectionNode)], top: &mut Vec<SectionNode>, sec: SectionNode) {
    match open.last_mut() {
        Some((_, parent)) => parent.children.push(sec),
        None => top.push(sec),
    }
}

/// Whether a `sec` or `p` opening now belongs to the body tree: directly in
/// `body`, or directly in the innermost tracked `sec`.
fn in_body_tree(stack: &[String], open: &[(usize, SectionNode)]) -> bool {
    if parent_is(stack, "body") {
        return open.is_empty();
    }
    parent_is(stack, "sec") && open.last().is_some_and(|(depth, _)| *depth + 1 == stack.len())
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn all_attributes(e: &BytesStart<'_>) -> BTreeMap<String, String> {
    e.attributes()
        .flatten()
        .filter_map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
            a.unescape_value().ok().map(|v| (key, v.into_owned()))
        })
        .collect()
}

/// Decode the predefined XML entities and leave numeric references alone.
fn decode_predefined(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has(stack: &[String], name: &str) -> bool {
    stack.iter().any(|s| s == name)
}

fn parent_is(stack: &[String], name: &str) -> bool {
    stack.last().is_some_and(|s| s == name)
}

/// Parse a `<pmc-articleset>` (or a single `<article>`) document.
pub fn parse_articles(xml: &str) -> Result<Vec<JatsArticle>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut articles = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut draft: Option<ArticleDraft> = None;
    let mut active: Option<Active> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = element_name(e);

                if let Some(cap) = active.as_mut() {
                    if let Capture::Paragraph { had_markup, .. } = &mut cap.kind {
                        *had_markup = true;
                    }
                } else if name == "article" {
                    draft = Some(ArticleDraft::new());
                } else if let Some(d) = draft.as_mut() {
                    let in_meta = has(&stack, "front") && has(&stack, "article-meta");
                    let kind = match name.as_str() {
                        "article-id" if in_meta && parent_is(&stack, "article-meta") => {
                            Some(Capture::ArticleId(attribute(e, "pub-id-type").unwrap_or_default()))
                        }
                        "article-title" if in_meta && parent_is(&stack, "title-group") => Some(Capture::Title),
                        "contrib" if in_meta && attribute(e, "contrib-type").as_deref() == Some("author") => {
                            d.open_author = Some(AuthorDraft::default());
                            None
                        }
                        "surname" if d.open_author.is_some() => Some(Capture::Surname),
                        "given-names" if d.open_author.is_some() => Some(Capture::GivenNames),
                        "pub-date" if in_meta => {
                            d.open_date = Some(PubDateDraft {
                                pub_type: attribute(e, "pub-type").or_else(|| attribute(e, "date-type")),
                                ..Default::default()
                            });
                            None
                        }
                        "year" if d.open_date.is_some() => Some(Capture::Year),
                        "month" if d.open_date.is_some() => Some(Capture::Month),
                        "day" if d.open_date.is_some() => Some(Capture::Day),
                        "kwd" if in_meta && has(&stack, "kwd-group") => Some(Capture::Keyword),
                        "sec" if in_body_tree(&stack, &d.open_sections) => {
                            d.open_sections.push((stack.len(), SectionNode::default()));
                            None
                        }
                        "p" if in_body_tree(&stack, &d.open_sections) => {
                            Some(Capture::Paragraph { attributes: all_attributes(e), had_markup: false })
                        }
                        _ => None,
                    };
                    if let Some(kind) = kind {
                        active = Some(Active { kind, depth: stack.len(), text: String::new() });
                    }
                }

                stack.push(name);
            }

            Ok(Event::Empty(_)) => {
                if let Some(Active { kind: Capture::Paragraph { had_markup, .. }, .. }) = active.as_mut() {
                    *had_markup = true;
                }
            }

            Ok(Event::Text(ref e)) => {
                if let Some(cap) = active.as_mut() {
                    if accepts_text(cap, &stack) {
                        cap.text.push_str(&decode_predefined(&String::from_utf8_lossy(e)));
                    }
                }
            }

            Ok(Event::CData(ref e)) => {
                if let Some(cap) = active.as_mut() {
                    if accepts_text(cap, &stack) {
                        cap.text.push_str(&String::from_utf8_lossy(e));
                    }
                }
            }

            Ok(Event::End(_)) => {
                let Some(name) = stack.pop() else {
                    continue;
                };

                if active.as_ref().is_some_and(|a| a.depth == stack.len()) {
                    if let (Some(cap), Some(d)) = (active.take(), draft.as_mut()) {
                        finish_capture(d, cap);
                    }
                    continue;
                }
                if active.is_some() {
                    continue;
                }

                if name == "article" {
                    if let Some(done) = draft.take() {
                        articles.push(done.finish());
                    }
                    continue;
                }
                let Some(d) = draft.as_mut() else {
                    continue;
                };
                match name.as_str() {
                    "contrib" => {
                        if let Some(a) = d.open_author.take() {
                            let full = format!("{} {}", a.given.trim(), a.surname.trim()).trim().to_string();
                            if !full.is_empty() {
                                d.record.authors.push(Author { name: full, source_author_id: None });
                            }
                        }
                    }
                    "pub-date" => {
                        if let Some(date) = d.open_date.take() {
                            d.pub_dates.push(date);
                        }
                    }
                    "sec" if d.open_sections.last().is_some_and(|(depth, _)| *depth == stack.len()) => {
                        if let Some((_, sec)) = d.open_sections.pop() {
                            attach_section(&mut d.open_sections, &mut d.sections, sec);
                        }
                    }
                    _ => {}
                }
            }

            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(LitmergeError::Xml(format!(
                    "JATS parse error at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    if let Some(d) = draft.take() {
        warn!("Unterminated <article>; keeping what was parsed");
        articles.push(d.finish());
    }
    debug!(n = articles.len(), "Parsed JATS articles");
    Ok(articles)
}

/// Paragraph captures only take text from the `<p>` itself or inline formatting inside it.
fn accepts_text(cap: &Active, stack: &[String]) -> bool {
    match cap.kind {
        Capture::Paragraph { .. } => stack[cap.depth + 1..]
            .iter()
            .all(|el| INLINE_ELEMENTS.contains(&el.as_str())),
        _ => true,
    }
}

fn finish_capture(d: &mut ArticleDraft, cap: Active) {
    let text = collapse_whitespace(&cap.text);
    match cap.kind {
        Capture::ArticleId(kind) => match kind.as_str() {
            "pmcid" | "pmc" | "pmcaid" => {
                if d.record.identifiers.pmc_id.is_none() {
                    d.record.identifiers.pmc_id = clean_pmcid(&text);
                }
            }
            "pmid" => d.record.identifiers.pubmed_id = Some(text).filter(|t| !t.is_empty()),
            "doi" => d.record.identifiers.doi = clean_doi(&text),
            _ => {}
        },
        Capture::Title => d.record.title = normalize(&text),
        Capture::Surname => {
            if let Some(a) = d.open_author.as_mut() {
                a.surname = text;
            }
        }
        Capture::GivenNames => {
            if let Some(a) = d.open_author.as_mut() {
                a.given = text;
            }
        }
        Capture::Keyword => {
            let kw = normalize(&text);
            if !kw.is_empty() {
                d.record.keywords.push(kw);
            }
        }
        Capture::Year => {
            if let Some(date) = d.open_date.as_mut() {
                date.year = Some(text).filter(|t| !t.is_empty());
            }
        }
        Capture::Month => {
            if let Some(date) = d.open_date.as_mut() {
                date.month = Some(text).filter(|t| !t.is_empty());
            }
        }
        Capture::Day => {
            if let Some(date) = d.open_date.as_mut() {
                date.day = Some(text).filter(|t| !t.is_empty());
            }
        }
        Capture::Paragraph { attributes, had_markup } => {
            let unit = if had_markup {
                TextUnit::Fragment(Fragment {
                    text: (!text.is_empty()).then(|| serde_json::Value::String(text)),
                    attributes,
                })
            } else {
                TextUnit::Plain(text)
            };
            match d.open_sections.last_mut() {
                Some((_, sec)) => sec.paragraphs.push(unit),
                None => d.body_paragraphs.push(unit),
            }
        }
    }
}
