//! Part-number extraction from noisy marketplace listings.
//!
//! Scraped listing data rarely hands over a clean manufacturer part
//! number. This module derives one with a precision-first priority
//! order: structured technical-detail fields beat title patterns,
//! title patterns beat description mining, and when everything fails
//! the platform's own id (e.g. the ASIN) stands in so downstream
//! matching always has something to work with.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::normalize::normalize_identifier;

/// Technical-detail keys that usually hold the real part number, in
/// trust order.
const DETAIL_KEYS: [&str; 8] = [
    "model name",
    "model number",
    "item model number",
    "part number",
    "manufacturer part number",
    "mpn",
    "sku",
    "item part number",
];

/// Digit-bearing tokens that look like part codes but are spec jargon.
const FALSE_POSITIVE_TOKENS: [&str; 18] = [
    "DDR3", "DDR4", "DDR5", "USB2", "USB3", "USB4", "GEN1", "GEN2", "GEN3", "CAT5E", "CAT6",
    "CAT6A", "RJ45", "1080P", "1440P", "2160P", "H264", "H265",
];

static RE_ASIN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^B[0-9A-Z]{9}$").expect("Invalid regex"));
static RE_VALID_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9\-_]+$").expect("Invalid regex"));
static RE_URL_ASIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:/dp/|/gp/product/)([A-Z0-9]{10})").expect("Invalid regex")
});
static RE_TITLE_TRAILING_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z0-9][A-Z0-9\-]{4,})\s*$").expect("Invalid regex"));
static RE_CODE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z0-9][A-Z0-9\-]{3,})\b").expect("Invalid regex"));
static RE_DESC_LABELED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:model|part\s*number|sku|mpn)\s*[:#]\s*([A-Za-z0-9][A-Za-z0-9\-_]{2,})")
        .expect("Invalid regex")
});
static RE_DESC_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z0-9][A-Z0-9\-]{5,})\b").expect("Invalid regex"));

/// Brand-specific title patterns, tried only when the brand keyword
/// appears in the uppercased title.
static BRAND_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("DELL", r"\b([A-Z]{1,2}[0-9]{4}[A-Z]{0,3})\b"),
        ("HP", r"\b([0-9][A-Z]{2}[0-9]{2}[A-Z]{2})\b"),
        ("LENOVO", r"\b([0-9]{2}[A-Z0-9]{8})\b"),
        ("CISCO", r"\b([A-Z]{1,3}[0-9]{3,4}[A-Z]?(?:-[A-Z0-9]+)+)\b"),
        ("APC", r"\b([A-Z]{2,4}[0-9]{3,5}[A-Z0-9]*)\b"),
        ("SAMSUNG", r"\b((?:LS|MZ|LF)[A-Z0-9\-]{6,})\b"),
        ("LOGITECH", r"\b(9[0-9]{2}-[0-9]{6})\b"),
        ("STARTECH", r"\b([A-Z0-9]{8,16})\b"),
    ]
    .into_iter()
    .map(|(brand, pattern)| (brand, Regex::new(pattern).expect("Invalid regex")))
    .collect()
});

/// Structured fields of one scraped listing.
#[derive(Debug, Clone, Default)]
pub struct ListingData {
    pub title: Option<String>,
    pub description: Option<String>,
    pub technical_details: BTreeMap<String, String>,
}

/// How the part number was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    TechnicalDetails,
    TitlePattern,
    DescriptionMining,
    PlatformId,
}

/// A derived part number plus the stage that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedPart {
    pub value: String,
    pub method: ExtractionMethod,
}

/// True for marketplace-native listing ids of the `B0…` form.
pub fn is_asin(s: &str) -> bool {
    RE_ASIN.is_match(s)
}

/// Pull an ASIN out of a marketplace URL (`/dp/…` or `/gp/product/…`).
pub fn asin_from_url(url: &str) -> Option<String> {
    RE_URL_ASIN
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_uppercase())
        .filter(|candidate| is_asin(candidate))
}

/// Derive a canonical part number from listing data, falling back to
/// the platform id when nothing better can be trusted.
pub fn extract_part_number(listing: &ListingData, platform_id: &str) -> ExtractedPart {
    if let Some(value) = from_technical_details(listing, platform_id) {
        return ExtractedPart { value, method: ExtractionMethod::TechnicalDetails };
    }
    if let Some(value) = from_title(listing, platform_id) {
        return ExtractedPart { value, method: ExtractionMethod::TitlePattern };
    }
    if let Some(value) = from_description(listing, platform_id) {
        return ExtractedPart { value, method: ExtractionMethod::DescriptionMining };
    }
    ExtractedPart { value: platform_id.to_string(), method: ExtractionMethod::PlatformId }
}

fn from_technical_details(listing: &ListingData, platform_id: &str) -> Option<String> {
    let lowered: BTreeMap<String, &str> = listing
        .technical_details
        .iter()
        .map(|(k, v)| (k.trim().to_lowercase(), v.as_str()))
        .collect();

    for key in DETAIL_KEYS {
        if let Some(raw) = lowered.get(key) {
            let value = raw.trim();
            if acceptable_part(value, platform_id) {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// A detail value is trusted only when it looks like a real part
/// number rather than a restatement of the listing id.
fn acceptable_part(value: &str, platform_id: &str) -> bool {
    if value.len() < 4 {
        return false;
    }
    let upper = value.to_uppercase();
    if is_asin(&upper) || upper.starts_with("FBA") {
        return false;
    }
    if normalize_identifier(value) == normalize_identifier(platform_id) {
        return false;
    }
    RE_VALID_PART.is_match(&upper)
}

fn from_title(listing: &ListingData, platform_id: &str) -> Option<String> {
    let title = listing.title.as_deref()?.to_uppercase();
    if title.is_empty() {
        return None;
    }

    // Brand tables first: a brand's own numbering scheme beats any
    // generic token heuristic
    for (brand, pattern) in BRAND_PATTERNS.iter() {
        if !title.contains(brand) {
            continue;
        }
        if let Some(c) = pattern.captures(&title) {
            if let Some(m) = c.get(1) {
                if acceptable_part(m.as_str(), platform_id) {
                    return Some(m.as_str().to_string());
                }
            }
        }
    }

    if let Some(c) = RE_TITLE_TRAILING_CODE.captures(&title) {
        if let Some(m) = c.get(1) {
            if looks_like_code(m.as_str()) && acceptable_part(m.as_str(), platform_id) {
                return Some(m.as_str().to_string());
            }
        }
    }

    // Standalone code tokens anywhere in the title; longest wins
    let mut best: Option<&str> = None;
    for c in RE_CODE_TOKEN.captures_iter(&title) {
        if let Some(m) = c.get(1) {
            let token = m.as_str();
            if !looks_like_code(token) || !acceptable_part(token, platform_id) {
                continue;
            }
            if best.map_or(true, |b| token.len() > b.len()) {
                best = Some(token);
            }
        }
    }
    best.map(|s| s.to_string())
}

/// Code tokens mix letters and digits and are not spec jargon.
fn looks_like_code(token: &str) -> bool {
    let has_digit = token.chars().any(|c| c.is_ascii_digit());
    let has_alpha = token.chars().any(|c| c.is_ascii_alphabetic());
    has_digit && has_alpha && !FALSE_POSITIVE_TOKENS.contains(&token)
}

fn from_description(listing: &ListingData, platform_id: &str) -> Option<String> {
    let description = listing.description.as_deref()?;
    if description.is_empty() {
        return None;
    }

    if let Some(c) = RE_DESC_LABELED.captures(description) {
        if let Some(m) = c.get(1) {
            let value = m.as_str().to_uppercase();
            if acceptable_part(&value, platform_id) {
                return Some(value);
            }
        }
    }

    // No explicit label: take the longest code-looking token
    let upper = description.to_uppercase();
    let mut best: Option<&str> = None;
    for c in RE_DESC_CODE.captures_iter(&upper) {
        if let Some(m) = c.get(1) {
            let token = m.as_str();
            if !looks_like_code(token) || !acceptable_part(token, platform_id) {
                continue;
            }
            if best.map_or(true, |b| token.len() > b.len()) {
                best = Some(token);
            }
        }
    }
    best.map(|s| s.to_string())
}
