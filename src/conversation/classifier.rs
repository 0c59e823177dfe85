//! Reply classifier — fixed vocabularies matched by regex or by whole token.

use std::sync::LazyLock;

use regex::Regex;

const POSITIVE: &str = r"\b(sim|bacana|ok|tá|ta|bom|recebi|receb|na\shora|ótimo|beleza|blz|entendi|show|confirmado|confirme|tá\sótimo|massa|valeu|s|manda|obrigado|obrigada|mande|envia|pode|👍|👍🏾|👍🏻|👍🏼|👍🏿|pode\sser)\b";
const NEGATIVE: &str = r"\b(n|nao|pare|parar|stop|não|\?|nada)\b";
const ASSISTANCE: &str = r"\b(atendente|humano|pessoa|atendimento|atedente|sair|porque|Porque|Por que|por que|Por quê)\b";
const NOT_TEXT: &str = r"\b(image|document|sticker)\b";

static POSITIVE_RE: LazyLock<Regex> = LazyLock::new(|| compile(POSITIVE));
static NEGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| compile(NEGATIVE));
static ASSISTANCE_RE: LazyLock<Regex> = LazyLock::new(|| compile(ASSISTANCE));
static NOT_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| compile(NOT_TEXT));

static POSITIVE_WORDS: LazyLock<Vec<String>> = LazyLock::new(|| vocabulary(POSITIVE));
static NEGATIVE_WORDS: LazyLock<Vec<String>> = LazyLock::new(|| vocabulary(NEGATIVE));
static ASSISTANCE_WORDS: LazyLock<Vec<String>> = LazyLock::new(|| vocabulary(ASSISTANCE));
static NOT_TEXT_WORDS: LazyLock<Vec<String>> = LazyLock::new(|| vocabulary(NOT_TEXT));

fn compile(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("intent patterns are valid regexes")
}

/// Intent categories, in the order the state machine consults them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Positive,
    Negative,
    Assistance,
    NotText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// A vocabulary entry must appear as whole whitespace-separated tokens.
    Exact,
    /// The pattern is searched anywhere in the text, ignoring case.
    Fuzzy,
}

/// Does `text` express `intent`?
pub fn classify(text: &str, intent: Intent, mode: MatchMode) -> bool {
    match mode {
        MatchMode::Fuzzy => fuzzy_regex(intent).is_match(text),
        MatchMode::Exact => contains_entry(text, exact_words(intent)),
    }
}

/// Positive with no negative cue. A reply carrying both is ambiguous.
pub fn is_clear_positive(text: &str, mode: MatchMode) -> bool {
    classify(text, Intent::Positive, mode) && !classify(text, Intent::Negative, mode)
}

/// Match an arbitrary `a|b|c` vocabulary.
pub fn matches_pattern(text: &str, pattern: &str, mode: MatchMode) -> bool {
    match mode {
        MatchMode::Fuzzy => Regex::new(&format!("(?i){pattern}"))
            .map(|re| re.is_match(text))
            .unwrap_or(false),
        MatchMode::Exact => contains_entry(text, &vocabulary(pattern)),
    }
}

fn fuzzy_regex(intent: Intent) -> &'static Regex {
    match intent {
        Intent::Positive => &POSITIVE_RE,
        Intent::Negative => &NEGATIVE_RE,
        Intent::Assistance => &ASSISTANCE_RE,
        Intent::NotText => &NOT_TEXT_RE,
    }
}

fn exact_words(intent: Intent) -> &'static [String] {
    match intent {
        Intent::Positive => &POSITIVE_WORDS,
        Intent::Negative => &NEGATIVE_WORDS,
        Intent::Assistance => &ASSISTANCE_WORDS,
        Intent::NotText => &NOT_TEXT_WORDS,
    }
}

/// Strip regex syntax from a word-boundary group, leaving plain entries.
fn vocabulary(pattern: &str) -> Vec<String> {
    pattern
        .replace(r"\b", "")
        .replace(r"\s", " ")
        .replace(r"\?", "?")
        .replace(['(', ')'], "")
        .split('|')
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// True if any entry occurs as a run of whole tokens in `text`.
fn contains_entry(text: &str, entries: &[String]) -> bool {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();

    entries.iter().any(|entry| {
        let words: Vec<&str> = entry.split_whitespace().collect();
        !words.is_empty() && tokens.windows(words.len()).any(|w| w == words.as_slice())
    })
}
