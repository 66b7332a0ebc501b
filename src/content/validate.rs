//! Checks applied to generated text before it is used.

use std::sync::LazyLock;

use regex::Regex;

pub const MIN_WORDS: usize = 50;
pub const MAX_WORDS: usize = 150;

static VALUE_PROP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(websites?|web\s?design|seo|online presence|visibility|more (customers|leads|clients|bookings)|grow)\b",
    )
    .expect("value proposition pattern")
});

static CTA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(call|chat|meet|meeting|schedule|book|reply|let me know|talk|connect)\b",
    )
    .expect("call-to-action pattern")
});

static SUBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*\**subject\**\s*:\s*(.+?)\s*$").expect("subject pattern"));

/// Why generated content was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("word count {0} outside [{MIN_WORDS}, {MAX_WORDS}]")]
    WordCount(usize),

    #[error("no hook referencing the business or category")]
    MissingHook,

    #[error("no value proposition")]
    MissingValueProposition,

    #[error("no call to action")]
    MissingCallToAction,
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split a leading `Subject:` line off generated text.
pub fn split_subject(raw: &str) -> (Option<String>, String) {
    let raw = raw.trim();
    let mut lines = raw.lines();
    if let Some(first) = lines.next()
        && let Some(caps) = SUBJECT_RE.captures(first)
    {
        let subject = caps[1].trim_matches('"').to_string();
        let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
        return (Some(subject).filter(|s| !s.is_empty()), body);
    }
    (None, raw.to_string())
}

/// Check the body for length and the three required slots.
pub fn validate(body: &str, business_name: &str, category: &str) -> Result<(), ValidationIssue> {
    let words = word_count(body);
    if !(MIN_WORDS..=MAX_WORDS).contains(&words) {
        return Err(ValidationIssue::WordCount(words));
    }

    let lower = body.to_lowercase();
    let mentions = |needle: &str| {
        let needle = needle.trim().to_lowercase();
        !needle.is_empty() && lower.contains(&needle)
    };
    if !mentions(business_name) && !mentions(category) {
        return Err(ValidationIssue::MissingHook);
    }
    if !VALUE_PROP_RE.is_match(body) {
        return Err(ValidationIssue::MissingValueProposition);
    }
    if !CTA_RE.is_match(body) {
        return Err(ValidationIssue::MissingCallToAction);
    }
    Ok(())
}
