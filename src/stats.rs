use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::{
    lexicon::{
        ADVERB_SET, AUXILIARY_SET, CONJUNCTION_SET, DETERMINER_SET, FIRST_NAME_SET, HONORIFIC_SET,
        LOCATION_CUE_SET, LOCATION_SET, LOCATION_SUFFIX_SET, NOT_ENTITY_SET,
        ORGANIZATION_HEAD_SET, ORGANIZATION_SUFFIX_SET, PREPOSITION_SET, PRONOUN_SET, STOPWORDS,
    },
    text::{remove_urls_and_emails, split_into_sentences},
};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Keyword {
    pub term: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Organization,
    Location,
    Other,
}

/// Named entities grouped by kind, each group deduplicated in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Entities {
    pub person: Vec<String>,
    pub organization: Vec<String>,
    pub location: Vec<String>,
    pub other: Vec<String>,
}

impl Entities {
    pub fn get(&self, kind: EntityKind) -> &[String] {
        match kind {
            EntityKind::Person => &self.person,
            EntityKind::Organization => &self.organization,
            EntityKind::Location => &self.location,
            EntityKind::Other => &self.other,
        }
    }

    fn push(&mut self, kind: EntityKind, name: String) {
        let group = match kind {
            EntityKind::Person => &mut self.person,
            EntityKind::Organization => &mut self.organization,
            EntityKind::Location => &mut self.location,
            EntityKind::Other => &mut self.other,
        };
        if !group.contains(&name) {
            group.push(name);
        }
    }

    pub fn len(&self) -> usize {
        self.person.len() + self.organization.len() + self.location.len() + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartOfSpeech {
    Noun,
    ProperNoun,
    Verb,
    Adjective,
    Adverb,
    Pronoun,
    Determiner,
    Preposition,
    Conjunction,
    Numeral,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DocumentStats {
    pub word_count: usize,
    pub sentence_count: usize,
    /// Unique over total cleaned tokens, 0 for a document without tokens.
    pub lexical_diversity: f64,
    pub avg_sentence_length: f64,
    /// Most frequent cleaned tokens, ties broken by first appearance.
    pub keywords: Vec<Keyword>,
    pub entities: Entities,
    /// Share of each part of speech among the raw words.
    pub pos_distribution: BTreeMap<PartOfSpeech, f64>,
    /// The first few sentences of the raw text.
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct StatsExtractor {
    top_keywords: usize,
    summary_sentences: usize,
}

impl Default for StatsExtractor {
    fn default() -> Self {
        Self::new(10)
    }
}

impl StatsExtractor {
    pub fn new(top_keywords: usize) -> Self {
        Self {
            top_keywords,
            summary_sentences: 3,
        }
    }

    /// Compute the statistics of one document from its cleaned and its raw (extracted) text.
    pub fn analyze(&self, cleaned: &str, raw: &str) -> DocumentStats {
        let tokens: Vec<&str> = cleaned.split_whitespace().collect();
        let unique = tokens.iter().collect::<rustc_hash::FxHashSet<_>>().len();
        let lexical_diversity = if tokens.is_empty() {
            0.0
        } else {
            unique as f64 / tokens.len() as f64
        };

        let sentences = split_into_sentences(raw);
        let word_count = raw
            .split_whitespace()
            .filter(|word| word.chars().any(char::is_alphanumeric))
            .count();
        let sentence_count = sentences.len();
        let avg_sentence_length = if sentence_count == 0 {
            0.0
        } else {
            word_count as f64 / sentence_count as f64
        };

        DocumentStats {
            word_count,
            sentence_count,
            lexical_diversity,
            avg_sentence_length,
            keywords: top_keywords(&tokens, self.top_keywords),
            entities: extract_entities(raw),
            pos_distribution: pos_distribution(&sentences),
            summary: sentences
                .iter()
                .take(self.summary_sentences)
                .copied()
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// [`StatsExtractor::analyze`] with the default settings.
pub fn analyze(cleaned: &str, raw: &str) -> DocumentStats {
    StatsExtractor::default().analyze(cleaned, raw)
}

fn top_keywords(tokens: &[&str], limit: usize) -> Vec<Keyword> {
    // token -> (count, first position)
    let mut counts: FxHashMap<&str, (usize, usize)> = FxHashMap::default();
    for (position, token) in tokens.iter().enumerate() {
        counts.entry(token).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .map(|(token, (count, first))| (token, count, first))
        .collect();
    ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    ranked
        .into_iter()
        .take(limit)
        .map(|(term, count, _)| Keyword {
            term: term.to_string(),
            count,
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Word<'a> {
    text: &'a str,
    // punctuation directly before or after the word ends a name
    break_before: bool,
    break_after: bool,
    // an abbreviation like "Corp." can hide a sentence end from the splitter
    ends_sentence: bool,
}

fn words_of(sentence: &str) -> Vec<Word<'_>> {
    sentence
        .split_whitespace()
        .filter_map(|raw| {
            let text = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '&');
            let text = text
                .strip_suffix("'s")
                .or_else(|| text.strip_suffix("’s"))
                .unwrap_or(text);
            if text.is_empty() {
                return None;
            }
            let honorific_dot = raw.ends_with('.') && is_honorific(text);
            Some(Word {
                text,
                break_before: !raw.starts_with(|c: char| c.is_alphanumeric() || c == '&'),
                break_after: !honorific_dot && !raw.ends_with(|c: char| c.is_alphanumeric() || c == '&'),
                ends_sentence: !honorific_dot && raw.ends_with(['.', '!', '?']),
            })
        })
        .collect()
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase)
}

fn is_honorific(word: &str) -> bool {
    HONORIFIC_SET.contains(word.to_lowercase().as_str())
}

fn is_connector(word: &str) -> bool {
    matches!(word, "of" | "the" | "and" | "&" | "de" | "for" | "on")
}

/// Rule-based named entity recognition over capitalized spans of the raw text.
pub fn extract_entities(raw: &str) -> Entities {
    let text = remove_urls_and_emails(raw);
    let mut entities = Entities::default();

    for sentence in split_into_sentences(&text) {
        let words = words_of(sentence);
        let mut k = 0;
        while k < words.len() {
            if !is_capitalized(words[k].text) {
                k += 1;
                continue;
            }

            // grow the span over capitalized words and inner connectors
            let start = k;
            let mut end = k + 1;
            while end < words.len() && !words[end - 1].break_after && !words[end].break_before {
                if is_capitalized(words[end].text) {
                    end += 1;
                } else if is_connector(words[end].text)
                    && end + 1 < words.len()
                    && !words[end].break_after
                    && is_capitalized(words[end + 1].text)
                    && !words[end + 1].break_before
                {
                    end += 2;
                } else {
                    break;
                }
            }
            k = end;

            let preceding = start.checked_sub(1).map(|i| words[i]);
            let sentence_start = preceding.map_or(true, |word| word.ends_sentence);
            let preceding = preceding.map(|word| word.text.to_lowercase());
            if let Some((kind, name)) =
                classify(&words[start..end], sentence_start, preceding.as_deref())
            {
                entities.push(kind, name);
            }
        }
    }

    entities
}

fn classify(span: &[Word<'_>], sentence_start: bool, preceding: Option<&str>) -> Option<(EntityKind, String)> {
    let mut span: Vec<&str> = span.iter().map(|word| word.text).collect();

    if let Some(first) = span.first() {
        if is_honorific(first) {
            let name = span[1..].join(" ");
            return (!name.is_empty()).then_some((EntityKind::Person, name));
        }
    }

    let strip_leading = |span: &mut Vec<&str>| {
        while let Some(first) = span.first() {
            let lower = first.to_lowercase();
            if STOPWORDS.contains(lower.as_str())
                || NOT_ENTITY_SET.contains(lower.as_str())
                || is_connector(&lower)
            {
                span.remove(0);
            } else {
                break;
            }
        }
    };
    strip_leading(&mut span);

    // a capital at the start of a sentence is grammar, not a name
    if sentence_start && span.len() > 1 {
        let first = span[0].to_lowercase();
        let known = FIRST_NAME_SET.contains(first.as_str())
            || LOCATION_SET.contains(first.as_str())
            || ORGANIZATION_HEAD_SET.contains(first.as_str())
            || LOCATION_SET.contains(span.join(" ").to_lowercase().as_str());
        if !known {
            span.remove(0);
            strip_leading(&mut span);
        }
    }

    let first = span.first()?.to_lowercase();
    let last = span.last()?.to_lowercase();
    let name = span.join(" ");
    let lower_name = name.to_lowercase();

    if span.len() == 1 && NOT_ENTITY_SET.contains(first.as_str()) {
        return None;
    }

    let kind = if ORGANIZATION_SUFFIX_SET.contains(last.as_str())
        || (span.len() > 1 && ORGANIZATION_HEAD_SET.contains(first.as_str()))
    {
        EntityKind::Organization
    } else if LOCATION_SET.contains(lower_name.as_str())
        || (span.len() > 1 && LOCATION_SUFFIX_SET.contains(last.as_str()))
    {
        EntityKind::Location
    } else if FIRST_NAME_SET.contains(first.as_str()) {
        EntityKind::Person
    } else if sentence_start && span.len() == 1 {
        // an unknown single word opening a sentence is most likely an ordinary word
        return None;
    } else if preceding.is_some_and(|word| LOCATION_CUE_SET.contains(word)) && span.len() <= 3 {
        EntityKind::Location
    } else {
        EntityKind::Other
    };

    Some((kind, name))
}

fn tag(word: &str, sentence_start: bool) -> PartOfSpeech {
    let lower = word.to_lowercase();
    let lower = lower.as_str();

    if DETERMINER_SET.contains(lower) {
        PartOfSpeech::Determiner
    } else if PRONOUN_SET.contains(lower) {
        PartOfSpeech::Pronoun
    } else if PREPOSITION_SET.contains(lower) {
        PartOfSpeech::Preposition
    } else if CONJUNCTION_SET.contains(lower) {
        PartOfSpeech::Conjunction
    } else if AUXILIARY_SET.contains(lower) {
        PartOfSpeech::Verb
    } else if ADVERB_SET.contains(lower) {
        PartOfSpeech::Adverb
    } else if word.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        PartOfSpeech::Numeral
    } else if !sentence_start && is_capitalized(word) {
        PartOfSpeech::ProperNoun
    } else if lower.len() > 4 && lower.ends_with("ly") {
        PartOfSpeech::Adverb
    } else if lower.len() > 4
        && ["ing", "ed", "ize", "ise", "ify"].iter().any(|s| lower.ends_with(s))
    {
        PartOfSpeech::Verb
    } else if lower.len() > 4
        && ["ous", "ful", "ive", "able", "ible", "al", "ic", "less", "ish"]
            .iter()
            .any(|s| lower.ends_with(s))
    {
        PartOfSpeech::Adjective
    } else {
        PartOfSpeech::Noun
    }
}

fn pos_distribution(sentences: &[&str]) -> BTreeMap<PartOfSpeech, f64> {
    let mut counts: BTreeMap<PartOfSpeech, usize> = BTreeMap::new();
    let mut total = 0usize;
    for sentence in sentences {
        for (i, word) in words_of(sentence).iter().enumerate() {
            *counts.entry(tag(word.text, i == 0)).or_default() += 1;
            total += 1;
        }
    }

    counts
        .into_iter()
        .map(|(pos, count)| (pos, count as f64 / total as f64))
        .collect()
}
