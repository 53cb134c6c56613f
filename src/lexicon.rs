//! Static word lists shared by the cleaner, the stats extractor and the language heuristic.

use std::{borrow::Cow, sync::LazyLock};

use rustc_hash::{FxHashMap, FxHashSet};

/// Words that carry no topical meaning on web pages: interface chrome, tracking, social links.
pub const WEB_STOPWORDS: &[&str] = &[
    "click", "cookie", "cookies", "subscribe", "unsubscribe", "subscription", "login", "logout",
    "signin", "signup", "share", "privacy", "policy", "menu", "newsletter", "skip", "javascript",
    "browser", "advertisement", "advert", "ads", "terms", "copyright", "reserved", "accept",
    "facebook", "twitter", "instagram", "linkedin", "pinterest", "youtube", "whatsapp", "http",
    "https", "www", "com", "html", "reply", "toggle", "loading", "password", "username", "cart",
    "checkout", "captcha",
];

/// Phrases removed before sentence splitting. Matched ASCII case-insensitively.
pub const BOILERPLATE_PHRASES: &[&str] = &[
    "all rights reserved",
    "skip to main content",
    "skip to content",
    "skip to navigation",
    "accept all cookies",
    "accept cookies",
    "we use cookies",
    "this website uses cookies",
    "cookie policy",
    "cookie settings",
    "privacy policy",
    "terms of service",
    "terms of use",
    "terms and conditions",
    "sign up for our newsletter",
    "subscribe to our newsletter",
    "follow us on",
    "share this article",
    "share on facebook",
    "share on twitter",
    "click here",
    "read more",
    "log in",
    "sign in",
    "sign up",
    "back to top",
    "powered by wordpress",
    "javascript is disabled",
    "please enable javascript",
    "your browser does not support",
    "leave a comment",
    "leave a reply",
];

/// Stopwords the language heuristic looks for, a deliberately small set of very frequent words.
pub const COMMON_EN_STOPWORDS: &[&str] = &[
    "the", "and", "is", "are", "was", "were", "be", "been", "being", "to", "of", "in", "for",
    "on", "with", "as", "at", "by", "from", "that", "this", "it", "an", "a", "or", "if", "not",
    "can", "will", "would", "should", "could", "about", "into", "over", "after", "before",
    "between", "during", "than", "then", "so", "but", "because", "such", "these", "those", "we",
    "you", "they", "he", "she", "his", "her", "our", "your", "their", "have", "has", "had", "do",
    "does", "did", "all", "any", "some", "no", "more", "most", "other", "one", "also", "may",
    "there", "here", "when", "where", "which", "who", "whom", "what", "how", "why",
];

/// Plural forms the suffix rules would get wrong.
const IRREGULAR_PLURALS: &[(&str, &str)] = &[
    ("children", "child"), ("men", "man"), ("women", "woman"), ("people", "person"),
    ("mice", "mouse"), ("geese", "goose"), ("feet", "foot"), ("teeth", "tooth"), ("oxen", "ox"),
    ("dice", "die"), ("analyses", "analysis"), ("crises", "crisis"), ("theses", "thesis"),
    ("hypotheses", "hypothesis"), ("diagnoses", "diagnosis"), ("criteria", "criterion"),
    ("phenomena", "phenomenon"), ("indices", "index"), ("matrices", "matrix"),
    ("vertices", "vertex"), ("appendices", "appendix"), ("wolves", "wolf"), ("knives", "knife"),
    ("leaves", "leaf"), ("lives", "life"), ("wives", "wife"), ("halves", "half"),
    ("shelves", "shelf"), ("thieves", "thief"), ("loaves", "loaf"), ("calves", "calf"),
    ("selves", "self"), ("elves", "elf"), ("scarves", "scarf"), ("shoes", "shoe"),
    ("toes", "toe"), ("canoes", "canoe"), ("movies", "movie"), ("cookies", "cookie"),
    ("pies", "pie"), ("ties", "tie"), ("lies", "lie"), ("species", "species"),
    ("series", "series"), ("sizes", "size"), ("prizes", "prize"), ("mazes", "maze"),
];

/// Words ending in `s` that are not plurals.
const NOT_PLURAL: &[&str] = &[
    "news", "physics", "mathematics", "economics", "politics", "ethics", "athletics",
    "linguistics", "gymnastics", "always", "perhaps", "sometimes", "towards", "afterwards",
    "whereas", "across", "plus", "minus", "yes", "has", "was", "does", "its", "his", "hers",
    "ours", "yours", "theirs", "bias", "gas", "lens", "chaos", "atlas", "canvas", "alias",
    "kudos", "pants", "scissors", "thus", "besides", "unless", "various", "previous",
    "famous", "serious", "numerous", "religious", "obvious", "dangerous", "nervous",
];

pub const HONORIFICS: &[&str] = &[
    "mr", "mrs", "ms", "miss", "mx", "dr", "prof", "professor", "sir", "dame", "lord", "lady",
    "president", "senator", "judge", "rev", "reverend", "captain", "capt", "gen", "general",
    "king", "queen", "prince", "princess", "pope", "minister", "governor", "mayor", "chancellor",
];

pub const FIRST_NAMES: &[&str] = &[
    "james", "john", "robert", "michael", "william", "david", "richard", "joseph", "thomas",
    "charles", "christopher", "daniel", "matthew", "anthony", "mark", "donald", "steven",
    "paul", "andrew", "joshua", "kevin", "brian", "george", "edward", "peter", "henry", "jack",
    "samuel", "benjamin", "alexander", "oliver", "harry", "lucas", "martin", "simon", "stephen",
    "mary", "patricia", "jennifer", "linda", "elizabeth", "barbara", "susan", "jessica",
    "sarah", "karen", "nancy", "lisa", "margaret", "betty", "sandra", "ashley", "emily", "anna",
    "emma", "olivia", "sophia", "charlotte", "amelia", "grace", "alice", "julia", "laura",
    "helen", "rachel", "catherine", "maria", "marie", "hannah", "rebecca", "claire", "ada",
    "albert", "isaac", "angela", "barack", "hillary", "elon", "bill",
    "steve", "tim", "jeff", "mike", "tom", "ben", "sam", "max", "ali", "mohammed", "wei",
    "yuki", "hans", "pierre", "carlos", "juan", "ahmed", "raj", "priya",
];

pub const ORGANIZATION_SUFFIXES: &[&str] = &[
    "inc", "corp", "corporation", "company", "co", "ltd", "llc", "plc", "gmbh", "ag", "sa",
    "group", "holdings", "university", "college", "institute", "foundation", "association",
    "agency", "bank", "council", "committee", "ministry", "department", "party", "society",
    "organization", "organisation", "union", "league", "club", "school", "academy",
    "hospital", "laboratories", "labs", "technologies", "systems", "press", "network",
    "commission", "federation", "authority", "bureau", "office", "service", "services",
    "airlines", "motors", "industries", "partners", "solutions", "software", "media",
];

/// Words that make a span an organization when it starts with them, as in "University of Oxford".
pub const ORGANIZATION_HEADS: &[&str] = &[
    "university", "bank", "department", "ministry", "institute", "college", "museum",
    "federal", "national", "royal",
];

pub const LOCATIONS: &[&str] = &[
    // continents and regions
    "africa", "asia", "europe", "antarctica", "australia", "oceania", "north america",
    "south america", "latin america", "middle east", "scandinavia", "caribbean",
    // countries
    "afghanistan", "argentina", "austria", "bangladesh", "belgium", "brazil", "canada",
    "chile", "china", "colombia", "cuba", "denmark", "egypt", "england", "ethiopia", "finland",
    "france", "germany", "greece", "hungary", "iceland", "india", "indonesia", "iran", "iraq",
    "ireland", "israel", "italy", "japan", "kenya", "korea", "mexico", "morocco", "nepal",
    "netherlands", "new zealand", "nigeria", "norway", "pakistan", "peru", "philippines",
    "poland", "portugal", "russia", "scotland", "singapore", "south africa", "spain", "sweden",
    "switzerland", "syria", "thailand", "turkey", "ukraine", "united kingdom", "united states",
    "usa", "uk", "vietnam", "wales",
    // cities
    "amsterdam", "athens", "bangkok", "barcelona", "beijing", "berlin", "boston", "brussels",
    "budapest", "cairo", "chicago", "copenhagen", "delhi", "dublin", "edinburgh", "geneva",
    "hamburg", "helsinki", "hong kong", "istanbul", "jakarta", "lagos", "lisbon", "london",
    "los angeles", "madrid", "manchester", "melbourne", "mexico city", "milan", "moscow",
    "mumbai", "munich", "nairobi", "new york", "oslo", "paris", "prague", "rome",
    "san francisco", "seattle", "seoul", "shanghai", "stockholm", "sydney", "tokyo",
    "toronto", "vancouver", "vienna", "warsaw", "washington", "zurich",
    // states and provinces
    "california", "texas", "florida", "ohio", "oregon", "alaska", "hawaii", "bavaria",
    "ontario", "quebec", "queensland", "tuscany",
];

pub const LOCATION_SUFFIXES: &[&str] = &[
    "city", "county", "river", "lake", "mountain", "mountains", "island", "islands", "valley",
    "bay", "sea", "ocean", "street", "avenue", "road", "park", "province", "region", "coast",
    "desert", "forest", "peninsula", "strait", "gulf", "canyon", "harbour", "harbor",
];

/// Words after which a capitalized span most likely names a place.
pub const LOCATION_CUES: &[&str] = &["in", "at", "from", "near", "across", "throughout", "outside"];

/// Capitalized words that are never entities on their own.
pub const NOT_ENTITIES: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "monday", "tuesday", "wednesday", "thursday", "friday",
    "saturday", "sunday", "i",
];

/// Abbreviations whose trailing dot does not end a sentence.
pub const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "st", "jr", "sr", "vs", "etc", "inc", "ltd", "co", "corp",
    "e.g", "i.e", "no", "fig", "approx", "dept", "gen", "capt", "rev", "mt",
];

// closed word classes for the part-of-speech tagger
pub const DETERMINERS: &[&str] = &[
    "a", "an", "the", "this", "that", "these", "those", "every", "each", "some", "any", "no",
    "another", "either", "neither", "all", "both",
];
pub const PRONOUNS: &[&str] = &[
    "i", "me", "my", "mine", "myself", "you", "your", "yours", "yourself", "he", "him", "his",
    "himself", "she", "her", "hers", "herself", "it", "its", "itself", "we", "us", "our",
    "ours", "ourselves", "they", "them", "their", "theirs", "themselves", "who", "whom",
    "whose", "which", "what", "someone", "something", "anyone", "anything", "everyone",
    "everything", "nobody", "nothing",
];
pub const PREPOSITIONS: &[&str] = &[
    "of", "in", "to", "for", "with", "on", "at", "from", "by", "about", "as", "into", "like",
    "through", "after", "over", "between", "out", "against", "during", "without", "before",
    "under", "around", "among", "across", "behind", "beyond", "near", "since", "toward",
    "towards", "upon", "within", "along", "above", "below",
];
pub const CONJUNCTIONS: &[&str] = &[
    "and", "or", "but", "nor", "yet", "so", "because", "although", "though", "while", "if",
    "unless", "whereas", "whether", "since", "than",
];
pub const AUXILIARIES: &[&str] = &[
    "is", "are", "was", "were", "be", "been", "being", "am", "have", "has", "had", "do",
    "does", "did", "will", "would", "shall", "should", "can", "could", "may", "might", "must",
];
pub const ADVERBS: &[&str] = &[
    "not", "very", "also", "often", "always", "never", "sometimes", "here", "there", "now",
    "then", "too", "again", "already", "soon", "still", "just", "quite", "almost", "even",
];

macro_rules! word_set {
    ($name:ident, $($list:expr),+) => {
        pub static $name: LazyLock<FxHashSet<&'static str>> =
            LazyLock::new(|| [$($list),+].into_iter().flatten().copied().collect());
    };
}

/// NLTK English stopwords together with [`WEB_STOPWORDS`].
pub static STOPWORDS: LazyLock<FxHashSet<String>> = LazyLock::new(|| {
    let mut stopwords: FxHashSet<String> = stop_words::get(stop_words::LANGUAGE::English)
        .into_iter()
        .collect();
    stopwords.extend(WEB_STOPWORDS.iter().map(|word| word.to_string()));
    stopwords
});

word_set!(HEURISTIC_STOPWORDS, COMMON_EN_STOPWORDS);
word_set!(HONORIFIC_SET, HONORIFICS);
word_set!(FIRST_NAME_SET, FIRST_NAMES);
word_set!(ORGANIZATION_SUFFIX_SET, ORGANIZATION_SUFFIXES);
word_set!(LOCATION_SET, LOCATIONS);
word_set!(LOCATION_SUFFIX_SET, LOCATION_SUFFIXES);
word_set!(LOCATION_CUE_SET, LOCATION_CUES);
word_set!(NOT_ENTITY_SET, NOT_ENTITIES);
word_set!(ABBREVIATION_SET, ABBREVIATIONS);
word_set!(NOT_PLURAL_SET, NOT_PLURAL);
word_set!(ORGANIZATION_HEAD_SET, ORGANIZATION_HEADS);
word_set!(DETERMINER_SET, DETERMINERS);
word_set!(PRONOUN_SET, PRONOUNS);
word_set!(PREPOSITION_SET, PREPOSITIONS);
word_set!(CONJUNCTION_SET, CONJUNCTIONS);
word_set!(AUXILIARY_SET, AUXILIARIES);
word_set!(ADVERB_SET, ADVERBS);

static IRREGULAR: LazyLock<FxHashMap<&'static str, &'static str>> =
    LazyLock::new(|| IRREGULAR_PLURALS.iter().copied().collect());

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Reduce a lowercase noun to its singular form.
///
/// Rule-based: an irregular table, a list of words that only look plural, then suffix rules.
/// Words that match no rule are returned unchanged.
pub fn lemmatize(token: &str) -> Cow<'_, str> {
    if let Some(&lemma) = IRREGULAR.get(token) {
        return Cow::Borrowed(lemma);
    }
    if token.len() <= 3 || NOT_PLURAL_SET.contains(token) {
        return Cow::Borrowed(token);
    }
    if token.ends_with("ss") || token.ends_with("us") || token.ends_with("is") {
        return Cow::Borrowed(token);
    }

    if let Some(stem) = token.strip_suffix("ies") {
        return Cow::Owned(format!("{stem}y"));
    }
    for suffix in ["sses", "xes", "ches", "shes", "zzes", "oes"] {
        if token.ends_with(suffix) {
            return Cow::Borrowed(&token[..token.len() - 2]);
        }
    }
    Cow::Borrowed(token.strip_suffix('s').unwrap_or(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwords_cover_english_and_web_lists() {
        for word in [
            "the", "and", "don", "t", "yourselves", "wouldn", "click", "cookies", "privacy",
            "policy", "login",
        ] {
            assert!(is_stopword(word), "{word}");
        }
        assert!(!is_stopword("river"));
    }

    #[test]
    fn lemmatizes_plural_nouns() {
        let cases = [
            ("cities", "city"),
            ("boxes", "box"),
            ("churches", "church"),
            ("classes", "class"),
            ("children", "child"),
            ("wolves", "wolf"),
            ("houses", "house"),
            ("gardens", "garden"),
            ("heroes", "hero"),
            ("news", "news"),
            ("status", "status"),
            ("analysis", "analysis"),
            ("glass", "glass"),
            ("bus", "bus"),
            ("river", "river"),
        ];
        for (input, expected) in cases {
            assert_eq!(lemmatize(input), expected, "{input}");
        }
    }
}
