//! Text cleanup before speech synthesis
//!
//! Model replies arrive as chat text with Markdown, digits, code spans and
//! emoji. TTS voices read those badly, so each sentence is normalized first.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static CODE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```([\s\S]*?)```|`([^`\n]+)`").expect("valid regex"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("valid regex"));
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#+\s*").expect("valid regex"));
static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*|__").expect("valid regex"));
static EMOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*[a-zA-Z0-9 -]+\*").expect("valid regex"));
static QUOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^>\s*").expect("valid regex"));
static RULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-*_]{3,}").expect("valid regex"));
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[-*+]\s+").expect("valid regex"));
static ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[*_]").expect("valid regex"));
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(\.\d+)?").expect("valid regex"));
static EMOJI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        "[\u{1F600}-\u{1F64F}\u{1F300}-\u{1F5FF}\u{1F680}-\u{1F6FF}\u{1F1E0}-\u{1F1FF}\
         \u{2600}-\u{26FF}\u{2700}-\u{27BF}\u{1F900}-\u{1F9FF}]+",
    )
    .expect("valid regex")
});
static CJK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]").expect("valid regex"));

/// Symbols pronounced everywhere
const SYMBOLS: &[(char, &str)] = &[
    ('@', "at"),
    ('#', "hash"),
    ('$', "dollar"),
    ('%', "percent"),
    ('^', "caret"),
    ('&', "ampersand"),
    ('*', "asterisk"),
    ('_', "underscore"),
    ('=', "equals"),
    ('+', "plus"),
    ('[', "left square bracket"),
    (']', "right square bracket"),
    ('{', "left curly brace"),
    ('}', "right curly brace"),
    ('|', "vertical bar"),
    ('\\', "backslash"),
    ('<', "less than"),
    ('>', "greater than"),
    ('/', "slash"),
    ('`', "backtick"),
    ('~', "tilde"),
];

/// Punctuation pronounced only inside code
const CODE_PUNCTUATION: &[(char, &str)] = &[
    ('!', "exclamation"),
    ('.', "dot"),
    (',', "comma"),
    ('?', "question mark"),
    (';', "semicolon"),
    (':', "colon"),
    ('"', "double quote"),
    ('\'', "single quote"),
    ('-', "minus"),
    ('(', "left parenthesis"),
    (')', "right parenthesis"),
];

const ONES: [&str; 10] = [
    "", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];
const TEENS: [&str; 10] = [
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];
const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];
const SCALES: [&str; 4] = ["", "thousand", "million", "billion"];

/// Normalize one sentence for speech synthesis
#[must_use]
pub fn preprocess_sentence(sentence: &str) -> String {
    let text = pronounce_code(sentence);
    let text = markdown_to_text(&text);
    let text = if is_cjk(&text) {
        text
    } else {
        pronounce_numbers(&text)
    };
    let text = pronounce_symbols(&text, SYMBOLS);
    let text = EMOJI.replace_all(&text, " ");

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether the text contains CJK script, in which case digits are left alone
#[must_use]
pub fn is_cjk(text: &str) -> bool {
    CJK.is_match(text)
}

fn pronounce_code(text: &str) -> String {
    CODE_SPAN
        .replace_all(text, |caps: &Captures<'_>| {
            let body = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            let spoken = pronounce_symbols(body, SYMBOLS);
            pronounce_symbols(&spoken, CODE_PUNCTUATION)
        })
        .into_owned()
}

/// Strip common Markdown so only readable text remains
#[must_use]
pub fn markdown_to_text(markdown: &str) -> String {
    let text = LINK.replace_all(markdown, "$1");
    let text = HEADING.replace_all(&text, "");
    let text = BOLD.replace_all(&text, "");
    // *sighs* style stage directions are dropped before single emphasis is stripped
    let text = EMOTE.replace_all(&text, "");
    let text = QUOTE.replace_all(&text, "");
    let text = RULE.replace_all(&text, "");
    let text = LIST_MARKER.replace_all(&text, "");
    let text = ITALIC.replace_all(&text, "");
    text.trim().to_string()
}

fn pronounce_symbols(text: &str, table: &[(char, &str)]) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match table.iter().find(|(sym, _)| *sym == c) {
            Some((_, word)) => {
                out.push(' ');
                out.push_str(word);
                out.push(' ');
            }
            None => out.push(c),
        }
    }
    out
}

fn pronounce_numbers(text: &str) -> String {
    NUMBER
        .replace_all(text, |caps: &Captures<'_>| {
            let raw = &caps[0];
            let (int_part, frac_part) = raw.split_once('.').unwrap_or((raw, ""));
            let Ok(int) = int_part.parse::<u64>() else {
                return raw.to_string();
            };
            let Some(mut words) = number_to_words(int) else {
                return raw.to_string();
            };
            if !frac_part.is_empty() {
                words.push_str(" point");
                for digit in frac_part.chars().filter_map(|c| c.to_digit(10)) {
                    words.push(' ');
                    words.push_str(if digit == 0 {
                        "zero"
                    } else {
                        ONES[digit as usize]
                    });
                }
            }
            words
        })
        .into_owned()
}

/// Spell out an integer in English, up to the billions
///
/// Returns `None` for values too large to name.
#[must_use]
pub fn number_to_words(mut n: u64) -> Option<String> {
    if n == 0 {
        return Some("zero".to_string());
    }

    let mut groups = Vec::new();
    let mut scale = 0;
    while n > 0 {
        let scale_word = SCALES.get(scale)?;
        #[allow(clippy::cast_possible_truncation)]
        let group = (n % 1000) as usize;
        if group != 0 {
            let mut words = group_to_words(group);
            if !scale_word.is_empty() {
                words.push(' ');
                words.push_str(scale_word);
            }
            groups.push(words);
        }
        n /= 1000;
        scale += 1;
    }

    groups.reverse();
    Some(groups.join(" "))
}

fn group_to_words(mut n: usize) -> String {
    let mut parts = Vec::new();
    if n >= 100 {
        parts.push(format!("{} hundred", ONES[n / 100]));
        n %= 100;
    }
    if n >= 20 {
        let tens = TENS[n / 10];
        match n % 10 {
            0 => parts.push(tens.to_string()),
            ones => parts.push(format!("{tens}-{}", ONES[ones])),
        }
    } else if n >= 10 {
        parts.push(TEENS[n - 10].to_string());
    } else if n > 0 {
        parts.push(ONES[n].to_string());
    }
    parts.join(" ")
}
