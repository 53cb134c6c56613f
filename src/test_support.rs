//! Builders for synthetic WARC archives and corpora used across the test modules.

use std::io::Write;

use tempfile::NamedTempFile;

pub mod prelude {
    pub(crate) use super::proptest as proptest_support;
    pub(crate) use super::{
        html_page, response_record, warc_record, ArchiveBuilder, ArchiveFormat,
    };
    pub(crate) use proptest::prelude::*;
}

pub fn warc_record(kind: &str, target: Option<&str>, block: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"WARC/1.1\r\n");
    out.extend_from_slice(format!("WARC-Type: {kind}\r\n").as_bytes());
    out.extend_from_slice(b"WARC-Date: 2024-03-01T12:00:00Z\r\n");
    out.extend_from_slice(
        format!(
            "WARC-Record-ID: <urn:uuid:{}>\r\n",
            &blake3::hash(block).to_hex()[..32]
        )
        .as_bytes(),
    );
    if let Some(target) = target {
        out.extend_from_slice(format!("WARC-Target-URI: {target}\r\n").as_bytes());
    }
    out.extend_from_slice(format!("Content-Length: {}\r\n", block.len()).as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(block);
    out.extend_from_slice(b"\r\n\r\n");
    out
}

pub fn response_record(url: &str, status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut block = Vec::new();
    block.extend_from_slice(format!("HTTP/1.1 {status} Status\r\n").as_bytes());
    block.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
    block.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    block.extend_from_slice(b"\r\n");
    block.extend_from_slice(body);
    warc_record("response", Some(url), &block)
}

/// A small HTML page with navigation chrome around an article.
pub fn html_page(title: &str, paragraphs: &[&str]) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">");
    html.push_str(&format!("<title>{title}</title>"));
    html.push_str("<script>var tracking = 'ignored';</script><style>p { color: red; }</style>");
    html.push_str("</head><body><nav><a href=\"/\">Home</a> <a href=\"/about\">About</a></nav>");
    html.push_str("<article>");
    for paragraph in paragraphs {
        html.push_str(&format!("<p>{paragraph}</p>"));
    }
    html.push_str("</article><footer>All rights reserved.</footer></body></html>");
    html
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Plain,
    Gzip,
    Zstd,
}

#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    records: Vec<Vec<u8>>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warcinfo(mut self) -> Self {
        self.records.push(warc_record(
            "warcinfo",
            None,
            b"software: webcorpus-tests\r\nformat: WARC File Format 1.1\r\n",
        ));
        self
    }

    pub fn response(mut self, url: &str, status: u16, content_type: &str, body: &[u8]) -> Self {
        self.records
            .push(response_record(url, status, content_type, body));
        self
    }

    pub fn html(self, url: &str, title: &str, paragraphs: &[&str]) -> Self {
        let page = html_page(title, paragraphs);
        self.response(url, 200, "text/html; charset=utf-8", page.as_bytes())
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.records.push(bytes.to_vec());
        self
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.records.concat()
    }

    pub fn write(&self, format: ArchiveFormat) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(match format {
                ArchiveFormat::Plain => ".warc",
                ArchiveFormat::Gzip => ".warc.gz",
                ArchiveFormat::Zstd => ".warc.zst",
            })
            .tempfile()
            .unwrap();

        match format {
            ArchiveFormat::Plain => file.write_all(&self.bytes()).unwrap(),
            ArchiveFormat::Gzip => {
                // one gzip member (or zstd frame) per record, as crawlers write them
                for record in &self.records {
                    let mut encoder =
                        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
                    encoder.write_all(record).unwrap();
                    file.write_all(&encoder.finish().unwrap()).unwrap();
                }
            }
            ArchiveFormat::Zstd => {
                for record in &self.records {
                    let compressed = zstd::encode_all(record.as_slice(), 3).unwrap();
                    file.write_all(&compressed).unwrap();
                }
            }
        }
        file.flush().unwrap();
        file
    }
}

pub mod proptest {
    use proptest::prelude::*;

    const SUBJECTS: &[&str] = &[
        "The river", "A farmer", "The engineer", "Our village", "The old bridge", "A storm",
        "The library", "Every student", "The orchestra", "A small boat",
    ];
    const VERBS: &[&str] = &[
        "crossed", "repaired", "visited", "described", "painted", "measured", "protected",
        "studied", "followed", "carried",
    ];
    const OBJECTS: &[&str] = &[
        "the northern valley", "several wooden houses", "the morning market",
        "a quiet harbour", "the mountain railway", "many colourful gardens",
        "the ancient castle", "a long winter", "the city museum", "fresh bread",
    ];

    /// A plausible English sentence, so that documents pass the language heuristic.
    pub fn sentence() -> impl Strategy<Value = String> {
        (
            prop::sample::select(SUBJECTS),
            prop::sample::select(VERBS),
            prop::sample::select(OBJECTS),
        )
            .prop_map(|(subject, verb, object)| format!("{subject} {verb} {object}."))
    }

    pub fn paragraph(max_sentences: usize) -> impl Strategy<Value = String> {
        prop::collection::vec(sentence(), 1..=max_sentences.max(1))
            .prop_map(|sentences| sentences.join(" "))
    }

    pub fn corpus(max_documents: usize) -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(paragraph(6), 1..=max_documents.max(1))
    }
}
