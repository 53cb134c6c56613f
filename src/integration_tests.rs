use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tempfile::NamedTempFile;

use crate::{
    archive_index::ArchiveIndex,
    config::PipelineConfig,
    pipeline::{ExclusionReason, Pipeline, RunError, RunOptions, RunOutput},
    resolver::{ContentResolver, ContentSource, FetchError, FetchPolicy, FetchedPage, LiveFetcher},
    similarity::Similarity,
    test_support::prelude::*,
    vector_space::{Fittable, TfidfVectorizer, VectorizeError},
};

/// Live web that is never reachable.
#[derive(Clone, Default)]
struct Unreachable {
    calls: Arc<AtomicUsize>,
}

impl LiveFetcher for Unreachable {
    fn fetch(&self, _url: &str, _timeout: Duration) -> Result<FetchedPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Transport("connection refused".into()))
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        min_word_count: 0,
        topic_count: 2,
        cluster_count: 2,
        kmeans_n_init: 3,
        ..PipelineConfig::default()
    }
}

fn resolver(
    archive: &ArchiveBuilder,
    format: ArchiveFormat,
    policy: FetchPolicy,
) -> (ContentResolver, Unreachable, NamedTempFile) {
    let file = archive.write(format);
    let index = ArchiveIndex::open(file.path()).unwrap();
    let fetcher = Unreachable::default();
    let resolver =
        ContentResolver::new(index, policy, Duration::from_secs(1)).with_fetcher(fetcher.clone());
    (resolver, fetcher, file)
}

fn run(
    archive: &ArchiveBuilder,
    config: &PipelineConfig,
    options: &RunOptions,
) -> Result<RunOutput, RunError> {
    let (mut resolver, _fetcher, _file) = resolver(archive, ArchiveFormat::Plain, config.fetch_policy);
    Pipeline::new(config).run(&mut resolver, options)
}

fn three_pages() -> ArchiveBuilder {
    ArchiveBuilder::new()
        .warcinfo()
        .html(
            "http://example.com/rivers",
            "Rivers",
            &["The river crossed the northern valley.", "Boats carried fresh bread to the harbour."],
        )
        .html(
            "http://example.com/castles",
            "Castles",
            &["The ancient castle protected the village.", "Every student studied its walls."],
        )
        .html(
            "http://example.com/music",
            "Music",
            &["The orchestra followed the conductor.", "Violins and drums filled the hall."],
        )
}

#[test]
fn three_documents_three_rows() {
    let archive = three_pages();
    let (mut resolver, fetcher, _file) =
        resolver(&archive, ArchiveFormat::Gzip, FetchPolicy::AllowLiveFallback);
    let config = config();
    let output = Pipeline::new(&config)
        .run(&mut resolver, &RunOptions::default())
        .unwrap();

    assert_eq!(output.report.requested, 3);
    assert_eq!(output.report.documents, 3);
    assert!(output.report.exclusions.is_empty());
    assert_eq!(output.results.len(), 3);

    let titles: Vec<&str> = output
        .results
        .documents()
        .iter()
        .map(|record| record.document.title.as_str())
        .collect();
    assert_eq!(titles, ["Rivers", "Castles", "Music"]);

    // everything came from the archive
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(output.report.resolver.archive_hits, 3);
    assert!(output
        .results
        .documents()
        .iter()
        .all(|record| record.document.content_source == ContentSource::Archive));

    for record in output.results.documents() {
        let total: f64 = record.topic_distribution.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(record.cluster < 2);
        assert!(!record.stats.keywords.is_empty());
    }
    assert_eq!(output.results.topics().len(), 2);
    assert_eq!(output.results.clusters().len(), 2);
}

#[test]
fn identical_documents_are_fully_similar() {
    let paragraphs = &["The lighthouse keeper watched the stormy harbour.", "Gulls circled the old pier."];
    let archive = ArchiveBuilder::new()
        .html("http://example.com/one", "One", paragraphs)
        .html("http://example.com/two", "Two", paragraphs)
        .html("http://example.com/three", "Three", &["Trains arrive at the central station."]);
    let output = run(&archive, &config(), &RunOptions::default()).unwrap();

    let first = output.results.documents()[0].document.index;
    let second = output.results.documents()[1].document.index;
    let similar = output.results.similar_to(first, 0.0, 10);
    assert_eq!(similar.len(), 1);
    assert_eq!(similar[0].0, second);
    assert!((similar[0].1 - 1.0).abs() < 1e-9);
}

#[test]
fn disjoint_documents_have_zero_similarity() {
    let archive = ArchiveBuilder::new()
        .html("http://example.com/one", "One", &["The lighthouse keeper watched the harbour."])
        .html("http://example.com/two", "Two", &["Trains arrive at the central station."]);
    let output = run(&archive, &config(), &RunOptions::default()).unwrap();

    assert!(output.results.pairs().is_empty());

    let texts: Vec<&str> = output
        .results
        .documents()
        .iter()
        .map(|record| record.document.cleaned_text.as_str())
        .collect();
    let space = TfidfVectorizer::new(config().tfidf())
        .fit(texts.as_slice())
        .unwrap();
    assert_eq!(space.fingerprint(), output.results.fingerprint());
    assert_eq!(Similarity::new(&space).score(0, 1), Some(0.0));
}

#[test]
fn top_pair_is_the_unique_maximum() {
    let archive = ArchiveBuilder::new()
        .html("http://example.com/0", "Orchard", &["Apples and pears grow in the orchard."])
        .html(
            "http://example.com/1",
            "Harbour",
            &["The lighthouse keeper watched the stormy harbour every night."],
        )
        .html("http://example.com/2", "Station", &["Trains arrive at the central station each morning."])
        .html(
            "http://example.com/3",
            "Lights",
            &["The lighthouse keeper watched the harbour lights at night."],
        );
    let config = PipelineConfig {
        similarity_top_k: 1,
        ..config()
    };
    let output = run(&archive, &config, &RunOptions::default()).unwrap();

    let pairs: Vec<(usize, usize)> = output
        .results
        .pairs()
        .iter()
        .map(|pair| (pair.a.get(), pair.b.get()))
        .collect();
    assert_eq!(pairs, [(1, 3)]);
}

#[test]
fn unavailable_url_is_excluded_without_shifting_indices() {
    let archive = three_pages();
    let (mut resolver, fetcher, _file) =
        resolver(&archive, ArchiveFormat::Zstd, FetchPolicy::AllowLiveFallback);
    let options = RunOptions {
        urls: Some(vec![
            "http://example.com/rivers".to_string(),
            "http://example.com/nowhere".to_string(),
            "http://example.com/castles".to_string(),
            "http://example.com/music".to_string(),
        ]),
        ..RunOptions::default()
    };
    let config = config();
    let output = Pipeline::new(&config).run(&mut resolver, &options).unwrap();

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(output.report.count(ExclusionReason::ContentUnavailable), 1);
    assert_eq!(output.report.exclusions[0].url, "http://example.com/nowhere");

    let urls: Vec<(usize, &str)> = output
        .results
        .documents()
        .iter()
        .map(|record| (record.document.index.get(), record.document.url.as_str()))
        .collect();
    assert_eq!(
        urls,
        [
            (0, "http://example.com/rivers"),
            (1, "http://example.com/castles"),
            (2, "http://example.com/music"),
        ]
    );
    assert!(output
        .results
        .pairs()
        .iter()
        .all(|pair| pair.a.get() < 3 && pair.b.get() < 3));
}

#[test]
fn per_document_exclusions_are_counted() {
    let archive = three_pages()
        .response("http://example.com/short", 200, "text/html", b"<html lang=\"en\"><p>Tiny.</p></html>")
        .response("http://example.com/garbled", 200, "text/html", b"<p>caf\xe9 \x00\x80\x81</p>");
    let options = RunOptions {
        urls: Some(vec![
            "http://example.com/rivers".to_string(),
            "http://EXAMPLE.com/rivers/".to_string(),
            "http://example.com/short".to_string(),
            "http://example.com/garbled".to_string(),
            "http://example.com/castles".to_string(),
            "http://example.com/music".to_string(),
        ]),
        ..RunOptions::default()
    };
    let config = PipelineConfig {
        min_word_count: 3,
        ..config()
    };
    let output = run(&archive, &config, &options).unwrap();

    let report = &output.report;
    assert_eq!(report.requested, 6);
    assert_eq!(report.documents, 3);
    assert_eq!(report.count(ExclusionReason::DuplicateUrl), 1);
    assert_eq!(report.count(ExclusionReason::BelowMinWordCount), 1);
    assert_eq!(report.count(ExclusionReason::DecodeError), 1);
    assert_eq!(report.count(ExclusionReason::ContentUnavailable), 0);
    assert_eq!(output.results.len(), report.documents);
}

#[test]
fn foreign_language_page_is_excluded() {
    let german = "<html lang=\"de\"><head><title>Der Fluss</title></head><body><p>\
        Der Fluss fliesst durch das alte Tal und die Boote bringen frisches Brot in den Hafen. \
        Jeden Morgen gehen die Kinder zur Schule und lernen Lesen und Schreiben mit ihren \
        freundlichen Lehrern im Dorf.</p></body></html>";
    assert!(german.split_whitespace().count() >= 30);
    let archive = ArchiveBuilder::new()
        .warcinfo()
        .html(
            "http://example.com/rivers",
            "Rivers",
            &[
                "The river crossed the northern valley and the boats carried fresh bread to the harbour.",
                "Every morning the farmers visited the market and the engineers repaired the old bridge.",
            ],
        )
        .html(
            "http://example.com/castles",
            "Castles",
            &[
                "The ancient castle protected the village through a long and very cold winter.",
                "Every student studied its walls and painted the many colourful gardens around it.",
            ],
        )
        .response("http://example.com/fluss", 200, "text/html; charset=utf-8", german.as_bytes());
    let config = PipelineConfig {
        topic_count: 2,
        cluster_count: 2,
        kmeans_n_init: 3,
        ..PipelineConfig::default()
    };
    let output = run(&archive, &config, &RunOptions::default()).unwrap();

    let report = &output.report;
    assert_eq!(report.requested, 3);
    assert_eq!(report.documents, 2);
    assert_eq!(report.count(ExclusionReason::NotEnglish), 1);
    assert_eq!(report.exclusions[0].url, "http://example.com/fluss");
    assert!(output
        .results
        .documents()
        .iter()
        .all(|record| record.document.language == "en" && !record.document.cleaned_text.is_empty()));
}

#[test]
fn runs_are_deterministic() {
    let archive = three_pages();
    let first = run(&archive, &config(), &RunOptions::default()).unwrap();
    let second = run(&archive, &config(), &RunOptions::default()).unwrap();
    assert_eq!(first.results, second.results);
}

#[test]
fn corpus_level_failures_abort_the_run() {
    let archive = three_pages();

    let too_strict = PipelineConfig {
        min_word_count: 10_000,
        ..config()
    };
    assert!(matches!(
        run(&archive, &too_strict, &RunOptions::default()).unwrap_err(),
        RunError::Vectorize(VectorizeError::EmptyVocabulary)
    ));

    let too_many_topics = PipelineConfig {
        topic_count: 4,
        ..config()
    };
    assert!(matches!(
        run(&archive, &too_many_topics, &RunOptions::default()).unwrap_err(),
        RunError::Engine(_)
    ));

    let options = RunOptions {
        timeout: Some(Duration::ZERO),
        ..RunOptions::default()
    };
    assert!(matches!(
        run(&archive, &config(), &options).unwrap_err(),
        RunError::Timeout { stage: "resolve", .. }
    ));
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 8, ..ProptestConfig::default() })]
    #[test]
    fn every_surviving_document_has_a_row(corpus in proptest_support::corpus(6)) {
        prop_assume!(corpus.len() >= 2);
        let mut archive = ArchiveBuilder::new().warcinfo();
        for (i, text) in corpus.iter().enumerate() {
            archive = archive.html(&format!("http://example.com/{i}"), &format!("Page {i}"), &[text.as_str()]);
        }
        let output = run(&archive, &config(), &RunOptions::default()).unwrap();

        prop_assert_eq!(output.report.documents, corpus.len());
        prop_assert_eq!(output.results.len(), corpus.len());
        for (i, record) in output.results.documents().iter().enumerate() {
            prop_assert_eq!(record.document.index.get(), i);
        }
    }
}
