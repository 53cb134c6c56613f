use std::{borrow::Cow, sync::LazyLock};

use scraper::{ElementRef, Html, Node, Selector};

use crate::{
    charset::{self, DecodeError, Decoded},
    lexicon::{is_stopword, lemmatize},
    text::{
        collapse_whitespace, looks_like_english, normalize_line_endings, remove_boilerplate,
        remove_urls_and_emails, split_into_sentences, split_into_tokens, strip_noise,
        to_lowercase,
    },
};

/// Language tag for text whose language could not be determined.
pub const UNDETERMINED_LANGUAGE: &str = "und";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Html,
    Xml,
    Text,
}

impl ContentKind {
    /// Map a lowercased media type to the kind of content it carries.
    ///
    /// Anything that is not markup or plain text (images, scripts, binaries) yields `None`.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            "text/html" | "application/xhtml+xml" => Some(ContentKind::Html),
            "text/xml" | "application/xml" => Some(ContentKind::Xml),
            "text/plain" => Some(ContentKind::Text),
            other if other.ends_with("+xml") => Some(ContentKind::Xml),
            _ => None,
        }
    }

    /// Guess the kind from the payload when no media type was sent.
    pub fn sniff(body: &[u8]) -> Self {
        let head = String::from_utf8_lossy(&body[..body.len().min(512)]).to_ascii_lowercase();
        let head = head.trim_start_matches('\u{feff}').trim_start();
        if head.starts_with("<?xml") && !head.contains("<html") {
            ContentKind::Xml
        } else if head.starts_with("<!doctype html") || head.contains("<html") || head.contains("<body") {
            ContentKind::Html
        } else {
            ContentKind::Text
        }
    }
}

/// Visible content of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    pub title: String,
    /// Visible text, one block element per line.
    pub text: String,
    /// Primary language subtag, `und` when unknown.
    pub language: String,
}

// elements whose content is never visible text
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "nav", "header", "footer", "aside", "form",
    "iframe", "head", "button", "select",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "dl", "dt", "dd", "h1", "h2", "h3", "h4", "h5", "h6",
    "tr", "table", "section", "article", "main", "blockquote", "pre", "figure", "figcaption",
    "hr", "address", "details", "summary",
];

macro_rules! selector {
    ($css:literal) => {{
        static SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse($css).unwrap());
        &SELECTOR
    }};
}

#[derive(Debug, Clone, Default)]
pub struct Extractor;

impl Extractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, content: &str, kind: ContentKind, url: &str) -> ExtractedPage {
        match kind {
            ContentKind::Html => self.extract_html(content, url),
            ContentKind::Xml => self.extract_xml(content, url),
            ContentKind::Text => {
                let text = collapse_whitespace(content);
                let language = guess_language(&text);
                ExtractedPage {
                    title: url.to_string(),
                    text,
                    language,
                }
            }
        }
    }

    fn extract_html(&self, content: &str, url: &str) -> ExtractedPage {
        let document = Html::parse_document(content);

        let root = document
            .select(selector!("article"))
            .next()
            .or_else(|| document.select(selector!("main")).next())
            .or_else(|| document.select(selector!("[role=main]")).next())
            .or_else(|| document.select(selector!("body")).next())
            .unwrap_or_else(|| document.root_element());

        let mut raw = String::new();
        collect_visible_text(root, &mut raw);
        let mut scratch_buffers = (String::new(), String::new());
        let text = collapse_whitespace(&normalize_line_endings(
            &raw,
            (&mut scratch_buffers.0, &mut scratch_buffers.1),
        ));

        let title = document
            .select(selector!("title"))
            .next()
            .map(|title| collapse_whitespace(&title.text().collect::<String>()).replace('\n', " "))
            .filter(|title| !title.is_empty())
            .or_else(|| {
                document
                    .select(selector!("h1"))
                    .next()
                    .map(|h1| collapse_whitespace(&h1.text().collect::<String>()).replace('\n', " "))
                    .filter(|title| !title.is_empty())
            })
            .unwrap_or_else(|| url.to_string());

        let declared_language = document
            .select(selector!("html"))
            .next()
            .and_then(|html| html.value().attr("lang"))
            .and_then(primary_subtag);
        let language = declared_language.unwrap_or_else(|| guess_language(&text));

        ExtractedPage {
            title,
            text,
            language,
        }
    }

    fn extract_xml(&self, content: &str, url: &str) -> ExtractedPage {
        use quick_xml::events::Event;

        let mut reader = quick_xml::Reader::from_str(content);
        reader.config_mut().trim_text(true);

        let mut raw = String::new();
        let mut title = None;
        let mut declared_language = None;
        let mut in_title = false;
        let mut depth = 0usize;

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    depth += 1;
                    if depth == 1 {
                        declared_language = e
                            .attributes()
                            .flatten()
                            .find(|attr| attr.key.as_ref() == b"xml:lang")
                            .and_then(|attr| attr.unescape_value().ok())
                            .and_then(|lang| primary_subtag(&lang));
                    }
                    in_title = title.is_none() && e.local_name().as_ref() == b"title";
                }
                Ok(Event::End(_)) => {
                    depth = depth.saturating_sub(1);
                    in_title = false;
                    raw.push('\n');
                }
                Ok(Event::Text(e)) => {
                    let Ok(text) = e.unescape() else {
                        continue;
                    };
                    if in_title {
                        title = Some(text.trim().to_string());
                    }
                    raw.push_str(&text);
                    raw.push(' ');
                }
                Ok(Event::CData(e)) => {
                    raw.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    raw.push(' ');
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    tracing::debug!(message = "stopping at malformed XML", url, position = reader.buffer_position(), error = %e);
                    break;
                }
                _ => {}
            }
        }

        let text = collapse_whitespace(&raw);
        let language = declared_language.unwrap_or_else(|| guess_language(&text));
        ExtractedPage {
            title: title
                .filter(|title| !title.is_empty())
                .unwrap_or_else(|| url.to_string()),
            text,
            language,
        }
    }
}

fn collect_visible_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(child_element) => {
                let tag = child_element.name();
                if SKIPPED_TAGS.contains(&tag) {
                    continue;
                }
                let is_block = BLOCK_TAGS.contains(&tag);
                if is_block {
                    out.push('\n');
                }
                if let Some(child) = ElementRef::wrap(child) {
                    collect_visible_text(child, out);
                }
                if is_block {
                    out.push('\n');
                } else if matches!(tag, "td" | "th") {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

fn primary_subtag(tag: &str) -> Option<String> {
    let primary = tag.trim().split(['-', '_']).next()?.to_ascii_lowercase();
    (!primary.is_empty() && primary.chars().all(|c| c.is_ascii_alphabetic())).then_some(primary)
}

fn guess_language(text: &str) -> String {
    if !text.trim().is_empty() && looks_like_english(text) {
        "en".to_string()
    } else {
        UNDETERMINED_LANGUAGE.to_string()
    }
}

/// A decoded, extracted and cleaned page.
#[derive(Debug, Clone)]
pub struct CleanedPage {
    pub page: ExtractedPage,
    pub cleaned_text: String,
    pub decoded: DecodedInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInfo {
    pub charset: charset::Charset,
    pub lossy: bool,
}

impl From<&Decoded> for DecodedInfo {
    fn from(decoded: &Decoded) -> Self {
        Self {
            charset: decoded.charset,
            lossy: decoded.lossy,
        }
    }
}

/// Turns raw page content into normalized text: lowercase lemmas without stopwords,
/// one sentence per line.
#[derive(Debug, Clone)]
pub struct Cleaner {
    extractor: Extractor,
    require_english: bool,
    allow_lossy_decoding: bool,
}

impl Default for Cleaner {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl Cleaner {
    pub fn new(require_english: bool, allow_lossy_decoding: bool) -> Self {
        Self {
            extractor: Extractor::new(),
            require_english,
            allow_lossy_decoding,
        }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Decode, extract and clean a payload.
    pub fn clean(
        &self,
        body: &[u8],
        declared_charset: Option<&str>,
        kind: ContentKind,
        url: &str,
    ) -> Result<CleanedPage, DecodeError> {
        let decoded = if self.allow_lossy_decoding {
            charset::decode_lossy(body, declared_charset)
        } else {
            charset::decode(body, declared_charset)?
        };

        let page = self.extractor.extract(&decoded.text, kind, url);
        let cleaned_text = self.clean_page(&page);
        Ok(CleanedPage {
            page,
            cleaned_text,
            decoded: DecodedInfo::from(&decoded),
        })
    }

    /// Clean already extracted text. Pages in another language clean to nothing.
    pub fn clean_page(&self, page: &ExtractedPage) -> String {
        if self.require_english && page.language != "en" {
            return String::new();
        }
        normalize(&page.text)
    }

    /// Clean free text, judging its language with the English heuristic.
    pub fn clean_text(&self, text: &str) -> String {
        if self.require_english && !looks_like_english(text) {
            return String::new();
        }
        normalize(text)
    }
}

fn normalize(text: &str) -> String {
    let text = remove_urls_and_emails(text);
    let text = remove_boilerplate(&text);

    let mut result = String::with_capacity(text.len());
    for sentence in split_into_sentences(&text) {
        let sentence = to_lowercase(&strip_noise(sentence));
        let lemmas: Vec<Cow<'_, str>> = split_into_tokens(&sentence)
            .into_iter()
            .filter(|token| token.chars().count() >= 2)
            .filter(|token| !is_stopword(token))
            .map(lemmatize)
            .collect();
        if lemmas.is_empty() {
            continue;
        }

        if !result.is_empty() {
            result.push('\n');
        }
        for (i, lemma) in lemmas.iter().enumerate() {
            if i > 0 {
                result.push(' ');
            }
            result.push_str(lemma);
        }
    }
    result
}
