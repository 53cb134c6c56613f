use std::{borrow::Cow, sync::LazyLock};

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use memchr::memmem;
use regex::Regex;

use crate::lexicon::{ABBREVIATION_SET, BOILERPLATE_PHRASES, HEURISTIC_STOPWORDS};

/// Swap every `needle` match in `text` for `replacement`, reusing `spare` as the output buffer.
///
/// Returns the resulting text and an empty buffer for the next call. When nothing matches,
/// `text` comes back untouched and `spare` is handed back unused. `needle` must be valid UTF-8
/// so that match boundaries are char boundaries.
fn str_replace_opt(
    mut text: String,
    needle: &memmem::Finder,
    replacement: &str,
    spare: String,
) -> (String, String) {
    let mut out = spare;
    let mut copied_up_to = 0;
    for start in needle.find_iter(text.as_bytes()) {
        out.push_str(&text[copied_up_to..start]);
        out.push_str(replacement);
        copied_up_to = start + needle.needle().len();
    }

    if copied_up_to == 0 {
        return (text, out);
    }
    out.push_str(&text[copied_up_to..]);
    text.clear();
    (out, text)
}

macro_rules! finder {
    ($needle:expr) => {{
        static FINDER: LazyLock<memmem::Finder> =
            LazyLock::new(|| memmem::Finder::new($needle.as_bytes()));
        &FINDER
    }};
}

/// Turn `\r\n` and lone `\r` into `\n`.
///
/// # Arguments
///
/// * `text` - The input text.
/// * `scratch_buffers` - Two empty scratch buffers, empty again after the call. They should be
///                       reused across calls.
pub fn normalize_line_endings(text: &str, scratch_buffers: (&mut String, &mut String)) -> String {
    if cfg!(feature = "optimized-str") {
        normalize_line_endings_optimized(text, scratch_buffers)
    } else {
        normalize_line_endings_naive(text)
    }
}

#[doc(hidden)] /* only public for benchmarking */
pub fn normalize_line_endings_naive(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[doc(hidden)] /* only public for benchmarking */
pub fn normalize_line_endings_optimized(
    text: &str,
    scratch_buffers: (&mut String, &mut String),
) -> String {
    scratch_buffers.0.push_str(text);

    let (text, scratch_buffer) = (
        std::mem::take(scratch_buffers.0),
        std::mem::take(scratch_buffers.1),
    );

    let (text, scratch_buffer) = str_replace_opt(text, finder!("\r\n"), "\n", scratch_buffer);
    let (text, scratch_buffer) = str_replace_opt(text, finder!("\r"), "\n", scratch_buffer);

    // scratch_buffer is already empty, the first buffer moves out with the result
    *scratch_buffers.1 = scratch_buffer;

    text
}

/// Collapse runs of whitespace into single spaces, keeping line breaks as single `\n`.
pub fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for line in text.lines() {
        let mut first = true;
        for word in line.split_whitespace() {
            if first {
                if !result.is_empty() {
                    result.push('\n');
                }
                first = false;
            } else {
                result.push(' ');
            }
            result.push_str(word);
        }
    }
    result
}

/// Replace URLs and email addresses with a space.
pub fn remove_urls_and_emails(text: &str) -> Cow<'_, str> {
    static REGEX_URL_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(?:https?://|ftp://|www\.)\S+|[\w.+-]+@[\w-]+(?:\.[\w-]+)+").unwrap()
    });
    REGEX_URL_EMAIL.replace_all(text, " ")
}

/// Replace known boilerplate phrases ("all rights reserved", cookie banners, ...) with a space.
pub fn remove_boilerplate(text: &str) -> String {
    static AHO_CORASICK: LazyLock<AhoCorasick> = LazyLock::new(|| {
        let mut builder = AhoCorasickBuilder::new();
        builder
            .match_kind(MatchKind::LeftmostLongest)
            .ascii_case_insensitive(true);
        let phrases = builder.build(BOILERPLATE_PHRASES).unwrap();
        tracing::debug!(
            message = "boilerplate matcher ready",
            phrases = BOILERPLATE_PHRASES.len(),
            kind = ?phrases.kind()
        );
        phrases
    });

    let mut result = String::with_capacity(text.len());
    AHO_CORASICK.replace_all_with(text, &mut result, |_, _, dst| {
        dst.push(' ');
        true
    });
    result
}

/// Replace everything that is neither alphanumeric nor whitespace with a space.
pub fn strip_noise(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect()
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_abbreviation(word: &str) -> bool {
    ABBREVIATION_SET.contains(word.to_ascii_lowercase().as_str())
}

/// Split text into trimmed, non-empty sentences.
///
/// A sentence ends at every line break and after a run of `.`, `!` or `?` that is followed by
/// whitespace, unless the run is a single dot closing a known abbreviation such as "Dr.".
pub fn split_into_sentences(text: &str) -> Vec<&str> {
    if cfg!(feature = "optimized-str") {
        split_into_sentences_optimized(text)
    } else {
        split_into_sentences_naive(text)
    }
}

#[doc(hidden)] /* only public for benchmarking */
pub fn split_into_sentences_naive(text: &str) -> Vec<&str> {
    static REGEX_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+\s+").unwrap());

    let mut result = Vec::new();
    for line in text.split('\n') {
        let mut start = 0;
        for m in REGEX_END.find_iter(line) {
            let run = m.as_str().trim_end();
            if run == "." {
                let word = line[..m.start()]
                    .rsplit(char::is_whitespace)
                    .next()
                    .unwrap_or_default();
                if is_abbreviation(word) {
                    continue;
                }
            }
            result.push(&line[start..m.start() + run.len()]);
            start = m.end();
        }
        result.push(&line[start..]);
    }

    result
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[doc(hidden)] /* only public for benchmarking */
pub fn split_into_sentences_optimized<'a>(text: &'a str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut push = |s: &'a str| {
        let s = s.trim();
        if !s.is_empty() {
            result.push(s);
        }
    };

    let mut start = 0;
    let mut word_start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\n' {
            push(&text[start..i]);
            start = i + 1;
            word_start = i + 1;
        } else if is_terminator(c) {
            let mut run_end = i + 1;
            while let Some(&(j, d)) = chars.peek() {
                if !is_terminator(d) {
                    break;
                }
                run_end = j + 1;
                chars.next();
            }

            let followed_by_space = matches!(chars.peek(), Some(&(_, d)) if d.is_whitespace() && d != '\n');
            if followed_by_space {
                let single_dot = c == '.' && run_end == i + 1;
                if !(single_dot && is_abbreviation(&text[word_start..i])) {
                    push(&text[start..run_end]);
                    start = run_end;
                }
            }
        } else if c.is_whitespace() {
            word_start = i + c.len_utf8();
        }
    }
    push(&text[start..]);

    result
}

/// Split text into maximal runs of alphanumeric characters.
pub fn split_into_tokens(text: &str) -> Vec<&str> {
    if cfg!(feature = "optimized-str") {
        split_into_tokens_optimized(text)
    } else {
        split_into_tokens_naive(text)
    }
}

#[doc(hidden)] /* only public for benchmarking */
pub fn split_into_tokens_naive(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect()
}

#[doc(hidden)] /* only public for benchmarking */
pub fn split_into_tokens_optimized(text: &str) -> Vec<&str> {
    if !text.is_ascii() {
        return split_into_tokens_naive(text);
    }

    // ascii fast path, every byte is a char boundary
    let bytes = text.as_bytes();
    let mut result = Vec::new();
    let mut start = None;
    for (i, b) in bytes.iter().enumerate() {
        match (b.is_ascii_alphanumeric(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                result.push(&text[s..i]);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        result.push(&text[s..]);
    }
    result
}

pub fn to_lowercase(input: &str) -> String {
    if cfg!(feature = "optimized-str") {
        to_lowercase_opt(input)
    } else {
        // for languages that have very little unicode (so basically: english), this is probably faster
        input.to_lowercase()
    }
}

#[doc(hidden)] /* only public for benchmarking */
pub fn to_lowercase_opt(input: &str) -> String {
    if input.is_ascii() {
        return input.to_ascii_lowercase();
    }

    let mut result = String::with_capacity(input.len());
    for c in input.chars() {
        match unicode_case_mapping::to_lowercase(c) {
            [0, 0] => result.push(c),
            [l, 0] => result.push(char::from_u32(l).unwrap_or(c)),
            [l, l2] => {
                result.push(char::from_u32(l).unwrap_or(c));
                if let Some(l2) = char::from_u32(l2) {
                    result.push(l2);
                }
            }
        }
    }
    result
}

/// Heuristic check that a text is meaningful English rather than another language or gibberish.
///
/// Texts too short to judge (under 30 characters or 10 words) pass.
pub fn looks_like_english(text: &str) -> bool {
    let normalized = collapse_whitespace(text).replace('\n', " ");
    let words: Vec<&str> = normalized
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    if normalized.chars().count() < 30 || words.len() < 10 {
        return true;
    }

    let mut letters = 0usize;
    let mut ascii_letters = 0usize;
    let mut vowels = 0usize;
    let mut non_printable = 0usize;
    let mut total = 0usize;
    for c in normalized.chars() {
        total += 1;
        if c.is_alphabetic() {
            letters += 1;
        }
        if c.is_ascii_alphabetic() {
            ascii_letters += 1;
        }
        if matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u') {
            vowels += 1;
        }
        if !(c.is_ascii_graphic() || c.is_ascii_whitespace()) {
            non_printable += 1;
        }
    }

    if letters == 0 {
        return false;
    }
    let letters = letters as f64;
    let total = total as f64;
    if (ascii_letters as f64) / letters < 0.85
        || (vowels as f64) / letters < 0.25
        || letters / total < 0.20
        || (non_printable as f64) / total > 0.15
    {
        return false;
    }

    let avg_len = words.iter().map(|w| w.len()).sum::<usize>() as f64 / words.len() as f64;
    if !(3.0..=12.0).contains(&avg_len) {
        return false;
    }

    let stopword_hits = words
        .iter()
        .filter(|w| HEURISTIC_STOPWORDS.contains(w.to_ascii_lowercase().as_str()))
        .count();
    (stopword_hits as f64) / (words.len() as f64) >= 0.01
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::prelude::*;

    #[test]
    fn test_split_into_sentences() {
        let text = "Dr. Smith visited the museum. It was closed!  Why?\nNew line here";
        let expected = vec![
            "Dr. Smith visited the museum.",
            "It was closed!",
            "Why?",
            "New line here",
        ];
        assert_eq!(split_into_sentences_naive(text), expected);
        assert_eq!(split_into_sentences_optimized(text), expected);
    }

    #[test]
    fn test_split_into_tokens() {
        assert_eq!(
            split_into_tokens_naive("don't stop-me now, 2024!"),
            vec!["don", "t", "stop", "me", "now", "2024"]
        );
        assert_eq!(split_into_tokens_naive("naïve café"), vec!["naïve", "café"]);
    }

    #[test]
    fn removes_urls_and_emails() {
        let text = "Visit https://example.com/page?x=1 or www.example.org, mail info@example.com now";
        let cleaned = remove_urls_and_emails(text);
        assert!(!cleaned.contains("example"), "{cleaned}");
        assert!(cleaned.starts_with("Visit "));
        assert!(cleaned.ends_with(" now"));
    }

    #[test]
    fn removes_boilerplate_case_insensitively() {
        let cleaned = remove_boilerplate("Great article. ALL RIGHTS RESERVED. Click Here to continue");
        assert!(!cleaned.to_lowercase().contains("rights reserved"));
        assert!(!cleaned.to_lowercase().contains("click here"));
        assert!(cleaned.contains("Great article."));
    }

    #[test]
    fn collapses_whitespace_but_keeps_lines() {
        assert_eq!(
            collapse_whitespace("  a \t b \n\n\n c  d \n"),
            "a b\nc d"
        );
    }

    #[test]
    fn english_heuristic() {
        assert!(looks_like_english(
            "The river crossed the northern valley and the farmer repaired several wooden houses before the winter."
        ));
        assert!(!looks_like_english(
            "Der Fluss überquerte das nördliche Tal und der Bauer reparierte mehrere hölzerne Häuser vor dem Winter, während es schneite."
        ));
        assert!(!looks_like_english(
            "xq zkrt pwvl mnbv qwrt zxcv plmk jhgf dfgh wxyz bcdf ghjk lmnp qrst"
        ));
        // too short to judge
        assert!(looks_like_english("Hallo Welt"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 10000,
            ..ProptestConfig::default()
        })]
        #[test]
        fn compare_split_into_sentences_optimized(input in "(Dr|e\\.g|etc|\\.|!|\\?| |\n|\t|\u{a0}|ä|a|b|.)*") {
            let expected = split_into_sentences_naive(&input);
            let result_optimized = split_into_sentences_optimized(&input);

            prop_assert_eq!(expected, result_optimized);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 10000,
            ..ProptestConfig::default()
        })]
        #[test]
        fn compare_split_into_tokens_optimized(input in "( |-|'|\n|a|Z|0|ß|é|.)*") {
            let expected = split_into_tokens_naive(&input);
            let result_optimized = split_into_tokens_optimized(&input);

            prop_assert_eq!(expected, result_optimized);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 10000,
            ..ProptestConfig::default()
        })]
        #[test]
        fn compare_to_lowercase_optimized(input in "[A-Za-z0-9À-ÖØ-öø-ÿ \n]*") {
            prop_assert_eq!(input.to_lowercase(), to_lowercase_opt(&input));
        }
    }

    proptest! {
        #[test]
        fn compare_normalize_line_endings_optimized(input in "(\r\n|\r|\n|a|b| )*") {
            let mut scratch_buffers = (String::new(), String::new());

            let expected = normalize_line_endings_naive(&input);
            let result_optimized = normalize_line_endings_optimized(&input, (&mut scratch_buffers.0, &mut scratch_buffers.1));

            prop_assert!(scratch_buffers.0.is_empty());
            prop_assert!(scratch_buffers.1.is_empty());
            prop_assert_eq!(expected, result_optimized);
        }
    }

    proptest! {
        #[test]
        fn generated_sentences_are_split_individually(paragraph in proptest_support::paragraph(5)) {
            let sentences = split_into_sentences(&paragraph);
            prop_assert_eq!(sentences.len(), paragraph.matches(". ").count() + 1);
        }
    }
}
