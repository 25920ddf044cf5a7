//! Message normalization and rendering (country/flag/platform lookups,
//! code extraction, MarkdownV2 escaping).
//!
//! Everything here is a pure function of the message plus the static
//! registries, so the whole pipeline is testable without any transport.

use regex::Regex;

use crate::{
    domain::RawMessage,
    registry::{Country, Platform},
};

const DEFAULT_EMOJI: &str = "✨";
const PLACEHOLDER_FLAG: &str = "🏳️";

// MarkdownV2 reserved characters. `+` is escaped as well even though the
// markup rules do not require it.
const MDV2_RESERVED: &str = "_*[]()~`>#+-=|{}.!";

pub fn digits_only(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Resolve a phone number to a country by dial-code prefix.
///
/// `countries` must be sorted by descending dial-code length (see
/// `registry::load_countries`): shorter dial codes can be prefixes of longer
/// ones, and ambiguity must resolve to the most specific match. A number with
/// no match yields an explicit "Unknown" row rather than an error.
pub fn detect_country(number: &str, countries: &[Country]) -> Country {
    let mut num = digits_only(number);
    if let Some(rest) = num.strip_prefix("00") {
        num = rest.to_string();
    }
    for row in countries {
        if !row.dial_code.is_empty() && num.starts_with(&row.dial_code) {
            return row.clone();
        }
    }
    Country {
        name_ar: "غير معروف".to_string(),
        name_en: "Unknown".to_string(),
        iso2: "UN".to_string(),
        dial_code: String::new(),
    }
}

/// Map a 2-letter country code to its regional-indicator pair.
pub fn iso_to_flag(iso2: &str) -> String {
    let code = iso2.trim().to_uppercase();
    let chars: Vec<char> = code.chars().collect();
    if chars.len() != 2 || !chars.iter().all(|c| c.is_ascii_alphabetic()) {
        return PLACEHOLDER_FLAG.to_string();
    }
    chars
        .iter()
        .filter_map(|c| char::from_u32(127_397 + *c as u32))
        .collect()
}

fn platform_row<'a>(service_name: &str, platforms: &'a [Platform]) -> Option<&'a Platform> {
    let key = service_name.trim().to_lowercase();
    platforms
        .iter()
        .find(|p| p.key.trim().to_lowercase() == key)
}

/// Registry `short` for the service, else the first two characters of the
/// service name, uppercased; "NA" when there is nothing to derive from.
pub fn service_short(service_name: &str, platforms: &[Platform]) -> String {
    if let Some(row) = platform_row(service_name, platforms) {
        if !row.short.trim().is_empty() {
            return row.short.trim().to_uppercase();
        }
    }
    let prefix: String = service_name.chars().take(2).collect();
    if prefix.is_empty() {
        "NA".to_string()
    } else {
        prefix.to_uppercase()
    }
}

pub fn service_emoji_id(service_name: &str, platforms: &[Platform]) -> String {
    platform_row(service_name, platforms)
        .map(|p| p.emoji_id.trim().to_string())
        .unwrap_or_default()
}

pub fn service_emoji_alt(service_name: &str, platforms: &[Platform]) -> String {
    platform_row(service_name, platforms)
        .map(|p| p.emoji.trim().to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_EMOJI.to_string())
}

/// Extract the verification code from a message body.
///
/// Grouped codes like `12-3456` win over a bare digit run; returns `None`
/// when neither pattern matches (the caller falls back to the phone number).
pub fn extract_code(message: &str) -> Option<String> {
    let grouped = Regex::new(r"\b\d{2,4}-\d{2,4}\b").expect("valid regex");
    if let Some(m) = grouped.find(message) {
        return Some(m.as_str().to_string());
    }
    let plain = Regex::new(r"\b\d{4,8}\b").expect("valid regex");
    plain.find(message).map(|m| m.as_str().to_string())
}

/// Escape every MarkdownV2-reserved character with a backslash.
pub fn md_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() * 2);
    for ch in text.chars() {
        if MDV2_RESERVED.contains(ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Keep the fenced block valid: any interior triple backtick would terminate
/// it early, so substitute an innocuous stand-in.
pub fn code_block_escape(text: &str) -> String {
    text.replace("```", "'''")
}

/// Render the final chat text: a quoted, bolded header line (platform short
/// code, ISO2, flag, `+`-prefixed number) followed by the message body in a
/// fenced block.
pub fn render(
    item: &RawMessage,
    countries: &[Country],
    platforms: &[Platform],
    use_custom_emoji: bool,
) -> String {
    let number_digits = digits_only(&item.number);
    let number_with_plus = if number_digits.is_empty() {
        item.number.clone()
    } else {
        format!("+{number_digits}")
    };

    let service_name = if item.service_name.is_empty() {
        "Unknown"
    } else {
        item.service_name.as_str()
    };
    let short = service_short(service_name, platforms);
    let emoji_id = service_emoji_id(service_name, platforms);
    let emoji_alt = service_emoji_alt(service_name, platforms);

    let country = detect_country(&item.number, countries);
    let flag = iso_to_flag(&country.iso2);

    let escaped_head = md_escape(&format!(
        "{short} {} {flag} {number_with_plus}",
        country.iso2
    ));
    let escaped_body = code_block_escape(item.message.trim());

    let emoji = if use_custom_emoji && !emoji_id.is_empty() {
        format!("![{emoji_alt}](tg://emoji?id={emoji_id}) ")
    } else {
        format!("{emoji_alt} ")
    };

    format!("> {emoji}*{escaped_head}*\n```\n{escaped_body}\n```")
}
