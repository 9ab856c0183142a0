//! Extraction of repair fields from card titles and card descriptions.
//!
//! Every function here is total: arbitrary input never panics, and a
//! missing match is reported as `None` or an empty string.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static REPAIR_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)repair\s*#?\s*(\d+)").expect("static regex"));

// The separator group after the number is mandatory: it keeps a name glued
// to the digits from being read as part of the number, and rejects a bare
// "Repair #123".
static REPAIR_DETAILS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)repair\s*#?\s*(\d+)[^\p{L}\p{N}]+(\p{L}+)(?: (\p{L}+))?")
        .expect("static regex")
});

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Identity fields parsed from a card title such as `Repair #61 : David K`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairDetails {
    pub repair_number: String,
    pub customer_first_name: String,
    /// Empty when the title carries a single name.
    pub customer_last_name: String,
}

/// Returns the digit run following "Repair" (optionally `#`), leading zeros kept.
pub fn parse_repair_number(card_name: &str) -> Option<String> {
    REPAIR_NUMBER
        .captures(card_name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn parse_repair_details(card_name: &str) -> Option<RepairDetails> {
    let cleaned = normalize_card_name(card_name);
    let caps = REPAIR_DETAILS.captures(&cleaned)?;
    Some(RepairDetails {
        repair_number: caps.get(1)?.as_str().to_string(),
        customer_first_name: caps.get(2)?.as_str().to_string(),
        customer_last_name: caps
            .get(3)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
    })
}

fn is_invisible(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}' | '\u{2060}')
}

/// Drops zero-width characters, collapses whitespace runs and trims.
pub fn normalize_card_name(raw: &str) -> String {
    let visible: String = raw.chars().filter(|c| !is_invisible(*c)).collect();
    WHITESPACE_RUN
        .replace_all(&visible, " ")
        .trim()
        .to_string()
}

/// Fields pulled from a Trello-style markdown card description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CardDescription {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub brand: String,
    pub model: String,
    pub material: String,
    pub reference_number: String,
    pub repair_options: String,
    pub select_box: String,
}

/// `**Label:** value`, also tolerating `**Label**: value`.
fn labeled(label: &str) -> Regex {
    Regex::new(&format!(
        r"(?im)^[ \t]*\*\*[ \t]*(?:{label})[ \t]*:?[ \t]*\*\*[ \t]*:?[ \t]*([^\r\n]*)"
    ))
    .expect("static regex")
}

struct FieldPatterns {
    first_name: Regex,
    last_name: Regex,
    email: Regex,
    phone: Regex,
    brand: Regex,
    model: Regex,
    material: Regex,
    reference_number: Regex,
    repair_options: Regex,
    select_box: Regex,
}

static FIELDS: Lazy<FieldPatterns> = Lazy::new(|| FieldPatterns {
    first_name: labeled("first name"),
    last_name: labeled("last name"),
    email: labeled("e-?mail(?: address)?"),
    phone: labeled("phone(?: number)?"),
    brand: labeled("brand"),
    model: labeled("model"),
    material: labeled("material"),
    reference_number: labeled("reference(?: number| #)?|ref(?:erence)? no\\.?"),
    repair_options: labeled("repair estimate options|estimate options"),
    select_box: labeled("select box|select"),
});

static MAILTO_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\]]*)\]\(mailto:([^)\s]+)\)").expect("static regex")
});

fn capture(re: &Regex, text: &str) -> String {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

fn clean_email(raw: &str) -> String {
    if let Some(caps) = MAILTO_LINK.captures(raw) {
        let shown = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        if shown.contains('@') {
            return shown.to_string();
        }
        return caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
    }
    raw.trim().to_string()
}

fn strip_brackets(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Runs the labeled extraction table; missing labels yield empty strings.
pub fn parse_card_description(markdown: &str) -> CardDescription {
    let f = &*FIELDS;
    CardDescription {
        first_name: capture(&f.first_name, markdown),
        last_name: capture(&f.last_name, markdown),
        email: clean_email(&capture(&f.email, markdown)),
        phone: capture(&f.phone, markdown),
        brand: capture(&f.brand, markdown),
        model: capture(&f.model, markdown),
        material: capture(&f.material, markdown),
        reference_number: capture(&f.reference_number, markdown),
        repair_options: strip_brackets(&capture(&f.repair_options, markdown)),
        select_box: capture(&f.select_box, markdown),
    }
}
