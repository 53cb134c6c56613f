use std::ops::Index;

use rustc_hash::FxHashMap;

use crate::{extractor::ContentKind, resolver::ContentSource};

/// Position of a document in its [`Corpus`], the join key between every per-document artifact.
///
/// Only [`Corpus::push`] hands out indices, so they are dense, stable and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct DocumentIndex(usize);

impl DocumentIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for DocumentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct WebpageDocument {
    pub index: DocumentIndex,
    pub url: String,
    pub title: String,
    pub cleaned_text: String,
    /// Length in characters of the extracted text before cleaning.
    pub raw_text_length: usize,
    pub language: String,
    pub content_source: ContentSource,
    pub content_kind: ContentKind,
    #[serde(skip)]
    pub raw_text: String,
}

/// Everything about a document except the index it is about to receive.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub url: String,
    pub title: String,
    pub cleaned_text: String,
    pub raw_text: String,
    pub language: String,
    pub content_source: ContentSource,
    pub content_kind: ContentKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{url} is already in the corpus as document {existing}")]
pub struct DuplicateUrl {
    pub url: String,
    pub existing: DocumentIndex,
}

/// Append-only arena of the documents of one run.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    documents: Vec<WebpageDocument>,
    by_url: FxHashMap<String, DocumentIndex>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, document: NewDocument) -> Result<DocumentIndex, DuplicateUrl> {
        if let Some(&existing) = self.by_url.get(&document.url) {
            return Err(DuplicateUrl {
                url: document.url,
                existing,
            });
        }

        let index = DocumentIndex(self.documents.len());
        self.by_url.insert(document.url.clone(), index);
        self.documents.push(WebpageDocument {
            index,
            raw_text_length: document.raw_text.chars().count(),
            url: document.url,
            title: document.title,
            cleaned_text: document.cleaned_text,
            language: document.language,
            content_source: document.content_source,
            content_kind: document.content_kind,
            raw_text: document.raw_text,
        });
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, index: DocumentIndex) -> Option<&WebpageDocument> {
        self.documents.get(index.0)
    }

    /// The index of row `row` of every per-document artifact, if the corpus has that many documents.
    pub fn index_at(&self, row: usize) -> Option<DocumentIndex> {
        (row < self.documents.len()).then_some(DocumentIndex(row))
    }

    pub fn index_of(&self, url: &str) -> Option<DocumentIndex> {
        self.by_url.get(url).copied()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &WebpageDocument> {
        self.documents.iter()
    }

    pub fn indices(&self) -> impl ExactSizeIterator<Item = DocumentIndex> {
        (0..self.documents.len()).map(DocumentIndex)
    }

    /// Cleaned texts in index order, the input of the vector space.
    pub fn cleaned_texts(&self) -> Vec<&str> {
        self.documents
            .iter()
            .map(|document| document.cleaned_text.as_str())
            .collect()
    }
}

impl Index<DocumentIndex> for Corpus {
    type Output = WebpageDocument;

    fn index(&self, index: DocumentIndex) -> &Self::Output {
        &self.documents[index.0]
    }
}
