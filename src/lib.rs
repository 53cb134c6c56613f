// SPDX-License-Identifier: MPL-2.0
//! # webcorpus
//!
//! Turn a WARC web archive into a cleaned corpus of webpages and analyze it: pairwise TF-IDF
//! similarity, LDA topics and k-means clusters, all joined on a stable document index.
//!
//! ## Overview
//!
//! A run goes through the following stages:
//!
//! 1. **Archive index** ([`archive_index`]): one streaming pass over a plain, gzip or zstd
//!    compressed WARC file records where every HTTP response lives. Malformed records are
//!    skipped and counted.
//! 2. **Content resolver** ([`resolver`]): maps URLs to payload bytes, archive first, with a
//!    per-run cache and an optional live fallback.
//! 3. **Cleaning** ([`charset`], [`extractor`], [`text`], [`lexicon`]): decode the payload,
//!    extract the visible text and normalize it into lowercase lemmas without stopwords.
//! 4. **Statistics** ([`stats`]): keywords, named entities, counts and lexical diversity.
//! 5. **Vector space** ([`vector_space`]): one TF-IDF fit over the whole corpus.
//! 6. **Engines** ([`similarity`], [`topics`], [`clustering`]): cosine similarity pairs, topic
//!    distributions and clusters over the same vector space.
//! 7. **Assembly** ([`assembler`]): a pure join on [`corpus::DocumentIndex`] that refuses
//!    misaligned or stale inputs.
//!
//! Stages 2 to 4 run per document (cleaning and statistics in parallel), everything from the
//! vector space on needs the complete corpus.
//!
//! ## Getting Started
//!
//! The simplest way is to run the whole pipeline over an archive:
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use webcorpus::config::PipelineConfig;
//! use webcorpus::pipeline::{run_archive, RunOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let output = run_archive(Path::new("crawl.warc.gz"), &config, &RunOptions::default())?;
//!
//!     for record in output.results.documents() {
//!         println!("{} {}", record.document.index, record.document.title);
//!     }
//!     println!("{} URLs excluded", output.report.exclusions.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Resolving and Cleaning Single Pages
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use webcorpus::archive_index::ArchiveIndex;
//! use webcorpus::extractor::Cleaner;
//! use webcorpus::resolver::{ContentResolver, FetchPolicy};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let index = ArchiveIndex::open("crawl.warc.gz")?;
//!     let mut resolver =
//!         ContentResolver::new(index, FetchPolicy::ArchiveOnly, Duration::from_secs(30));
//!
//!     let content = resolver.resolve("https://example.com/")?;
//!     let cleaned = Cleaner::default().clean(
//!         &content.body,
//!         content.charset.as_deref(),
//!         content.kind,
//!         &content.url,
//!     )?;
//!     println!("{}", cleaned.cleaned_text);
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Working on the Vector Space
//!
//! The vectorizer, the topic model and the clustering share the [`vector_space::Fittable`]
//! trait:
//!
//! ```rust
//! use webcorpus::similarity::Similarity;
//! use webcorpus::vector_space::{Fittable, TfidfConfig, TfidfVectorizer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let documents = ["river bank water", "river bank mud", "desert sand"];
//! let space = TfidfVectorizer::new(TfidfConfig::default()).fit(&documents[..])?;
//!
//! let top = Similarity::new(&space).top_k(1);
//! assert_eq!((top[0].i, top[0].j), (0, 1));
//! # Ok(())
//! # }
//! ```
//!
//! ## Index Consistency
//!
//! Documents live in an append-only [`corpus::Corpus`]; only [`corpus::Corpus::push`] hands out
//! a [`corpus::DocumentIndex`]. Excluded URLs never receive one, so they shift no existing
//! indices. Every artifact fitted on the vector space carries its [`vector_space::Fingerprint`]
//! and [`assembler::assemble`] rejects artifacts from another fit with `StaleArtifact` and any
//! length or range disagreement with `IndexMismatch`.
//!
//! ## Features and Configuration
//!
//! - All knobs of a run live in [`config::PipelineConfig`], loadable from TOML.
//! - `strict`: abort the archive scan at the first malformed record instead of skipping it.
//! - `optimized-str`: use the optimized string routines of [`text`]. Both variants produce the
//!   same output; the naive ones are easier to follow.
//!
//! ### Logging and Error Handling
//!
//! - Uses the `tracing` crate for logging; the binary installs a `tracing-subscriber` honoring
//!   `RUST_LOG`.
//! - Per-document problems (missing content, undecodable payloads, short or duplicate pages)
//!   exclude the document and are reported in [`pipeline::RunReport`]. Corpus-level problems
//!   abort the run with a [`pipeline::RunError`].
//!
//! ## Limitations
//!
//! - Named entities and parts of speech come from word lists and capitalization rules, not from
//!   a trained model.
//! - Only English is cleaned; pages in other languages yield empty cleaned text when English is
//!   required.
//!
//! ## Licensing
//!
//! This project is licensed under the Mozilla Public License 2.0.

pub mod archive_index;
pub mod assembler;
pub mod charset;
pub mod clustering;
pub mod config;
pub mod corpus;
pub mod extractor;
#[cfg(test)]
mod integration_tests;
pub mod lexicon;
pub mod pipeline;
pub mod resolver;
pub mod similarity;
pub mod stats;
#[cfg(test)]
mod test_support;
pub mod text;
pub mod topics;
pub mod vector_space;
pub mod warc_parser;
