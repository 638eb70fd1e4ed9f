//! Input normalizer: raw webhook payloads to canonical inputs, plus field parsers.
//!
//! Nothing in here fails loudly. Missing or malformed payload fields come back as
//! empty strings or `None`, and each dialogue step applies its own validation.

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

/// Longest phrase handed to the English date parser.
const MAX_DATE_PHRASE_LEN: usize = 40;
/// Longest digit run handed to the English date parser; larger offsets overflow its arithmetic.
const MAX_DATE_PHRASE_DIGITS: usize = 4;

/// Words that unconditionally return a conversation to the main menu.
pub const RESET_TOKENS: [&str; 7] = ["hi", "hello", "hey", "menu", "0", "restart", "start"];

/// Canonical form of one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedInput {
    /// Trimmed free text, or the label of the chosen option.
    pub text: String,
    /// Stable id of a button or list choice.
    pub selection_id: Option<String>,
}

impl NormalizedInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            selection_id: None,
        }
    }

    pub fn selection(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: label.into().trim().to_string(),
            selection_id: Some(id.into()),
        }
    }

    /// Lower-cased text for keyword matching.
    pub fn keyword(&self) -> String {
        self.text.to_lowercase()
    }

    pub fn is_reset(&self) -> bool {
        let kw = self.keyword();
        RESET_TOKENS.contains(&kw.as_str())
    }
}

fn str_at<'a>(v: &'a serde_json::Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(v, |acc, key| acc.get(key))
        .and_then(|x| x.as_str())
}

/// Normalizes one WhatsApp Cloud API message object (`messages[i]`).
pub fn normalize(message: &serde_json::Value) -> NormalizedInput {
    if let Some(body) = str_at(message, &["text", "body"]) {
        return NormalizedInput::text(body);
    }
    if let Some(interactive) = message.get("interactive") {
        for kind in ["button_reply", "list_reply"] {
            if let Some(reply) = interactive.get(kind) {
                let id = str_at(reply, &["id"]).unwrap_or("");
                let title = str_at(reply, &["title"]).unwrap_or("");
                if id.is_empty() {
                    return NormalizedInput::text(title);
                }
                return NormalizedInput::selection(id, title);
            }
        }
        return NormalizedInput::default();
    }
    // Template quick-reply buttons carry the label in `text` and the id in `payload`.
    if let Some(button) = message.get("button") {
        let label = str_at(button, &["text"]).unwrap_or("");
        return match str_at(button, &["payload"]).filter(|p| !p.is_empty()) {
            Some(payload) => NormalizedInput::selection(payload, label),
            None => NormalizedInput::text(label),
        };
    }
    NormalizedInput::default()
}

/// Sender and message object of an inbound webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub from: String,
    pub message: serde_json::Value,
}

/// Pulls the first message out of a webhook body (`entry[0].changes[0].value.messages[0]`).
/// Status callbacks and other bodies without messages yield `None`.
pub fn extract_inbound(body: &serde_json::Value) -> Option<InboundMessage> {
    let message = body
        .get("entry")?
        .get(0)?
        .get("changes")?
        .get(0)?
        .get("value")?
        .get("messages")?
        .get(0)?;
    let from = conversation_id(message.get("from")?.as_str()?)?;
    Some(InboundMessage {
        from,
        message: message.clone(),
    })
}

/// Stable conversation identity from a sender address: digits only.
pub fn conversation_id(sender: &str) -> Option<String> {
    let digits: String = sender.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Phone acceptance rules (bare local number of fixed length, or country-qualified).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneRules {
    pub country_code: String,
    pub local_digits: usize,
}

impl Default for PhoneRules {
    fn default() -> Self {
        Self {
            country_code: "91".to_string(),
            local_digits: 10,
        }
    }
}

impl PhoneRules {
    /// Returns the E.164 form (`+<cc><local>`), or `None` if the input is not a phone number.
    ///
    /// Accepted: `9876543210`, `919876543210`, `+919876543210`, `+44 20 7946 0958`.
    /// Separators (spaces, dashes, dots, parentheses) are ignored.
    pub fn normalize_phone(&self, input: &str) -> Option<String> {
        let trimmed = input.trim();
        let qualified = trimmed.starts_with('+');
        let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
        if !body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '.' | '(' | ')'))
        {
            return None;
        }
        let digits: String = body.chars().filter(|c| c.is_ascii_digit()).collect();
        if qualified {
            return (8..=15).contains(&digits.len()).then(|| format!("+{}", digits));
        }
        if digits.len() == self.local_digits {
            return Some(format!("+{}{}", self.country_code, digits));
        }
        if digits.len() == self.country_code.len() + self.local_digits
            && digits.starts_with(&self.country_code)
        {
            return Some(format!("+{}", digits));
        }
        None
    }
}

pub fn is_email(input: &str) -> bool {
    EMAIL_RE.is_match(input.trim())
}

/// Parses a free-text calendar date relative to `today`.
///
/// ISO `YYYY-MM-DD`, day-first `DD-MM-YYYY` / `DD/MM/YYYY`, `today`, `tomorrow`,
/// `day after tomorrow`, and other English phrasings ("next friday", "25 dec").
pub fn parse_date(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = input.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }
    match text.as_str() {
        "today" => return Some(today),
        "tomorrow" => return today.checked_add_signed(Duration::days(1)),
        "day after tomorrow" => return today.checked_add_signed(Duration::days(2)),
        _ => {}
    }
    for fmt in ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(&text, fmt) {
            return Some(d);
        }
    }
    // Purely numeric input that missed the formats above is not a date.
    if !text.chars().any(char::is_alphabetic) {
        return None;
    }
    if !is_plausible_date_phrase(&text) {
        return None;
    }
    let now = today.and_hms_opt(12, 0, 0)?.and_utc();
    chrono_english::parse_date_string(&text, now, chrono_english::Dialect::Uk)
        .ok()
        .map(|dt| dt.date_naive())
}

fn is_plausible_date_phrase(text: &str) -> bool {
    text.chars().count() <= MAX_DATE_PHRASE_LEN
        && text
            .split(|c: char| !c.is_ascii_digit())
            .all(|run| run.len() <= MAX_DATE_PHRASE_DIGITS)
}

/// Title-cases each whitespace-separated word ("mary ANN" -> "Mary Ann").
pub fn title_case(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical booking id: bare digits get `prefix`, a lower-case prefix is upper-cased.
pub fn normalize_record_id(input: &str, prefix: &str) -> String {
    let id = input.trim();
    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        return format!("{}{}", prefix, id);
    }
    match id.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => format!("{}{}", prefix, &id[prefix.len()..]),
        _ => id.to_string(),
    }
}
