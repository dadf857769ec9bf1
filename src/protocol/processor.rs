//! Turns raw serial lines into numeric readings.
//!
//! Nothing here holds state between calls. The only mutable input is the
//! history window in [`PortSettings`], which the reader loop fills in before
//! handing the line over.

use super::{constants::INVALID_VALUE, settings::PortSettings};

fn invalid() -> String {
    INVALID_VALUE.to_string()
}

/// Run the validation rules and cut the value out of `raw_line`.
///
/// Returns an empty string when there is nothing to process (blank line or
/// reading disabled), [`INVALID_VALUE`] when a rule rejects the line, and the
/// extracted slice otherwise.
pub fn process(raw_line: &str, settings: &PortSettings, reading_active: bool) -> String {
    if !reading_active || raw_line.trim().is_empty() {
        return String::new();
    }

    let chars: Vec<char> = raw_line.chars().collect();

    if let (true, Some(snippet)) = (settings.stability_active(), settings.stability_snippet()) {
        if !stability_matches(&chars, raw_line, snippet, settings.stability_start_pos()) {
            return invalid();
        }
    } else if settings.sequence_active() && !sequence_matches(raw_line, settings) {
        return invalid();
    }

    let line_len = chars.len();
    let start = settings.weight_start_pos();
    let end = settings.weight_end_pos();

    if let (Some(start), Some(end)) = (start, end) {
        if start >= 1 && start > end {
            return invalid();
        }
    }
    if matches!(start, Some(start) if start as usize > line_len) {
        return invalid();
    }
    if settings.must_conform_to_length()
        && settings.required_length().map(|len| len as usize) != Some(line_len)
    {
        return invalid();
    }

    let (Some(start), Some(end)) = (start, end) else {
        return invalid();
    };
    if start == 0 {
        return invalid();
    }

    let from = start as usize - 1;
    let to = (end as usize).min(line_len);
    if from >= to {
        return invalid();
    }
    let slice = &chars[from..to];

    if slice.iter().any(|c| c.is_alphabetic()) {
        slice
            .iter()
            .filter(|c| c.is_ascii_digit() || **c == '.' || **c == ',')
            .collect()
    } else {
        slice.iter().collect()
    }
}

fn stability_matches(chars: &[char], raw_line: &str, snippet: &str, start_pos: u32) -> bool {
    if !raw_line.contains(snippet) || start_pos == 0 {
        return false;
    }
    let from = start_pos as usize - 1;
    let to = from + snippet.chars().count();
    match chars.get(from..to) {
        Some(window) => window.iter().copied().eq(snippet.chars()),
        None => false,
    }
}

/// The window already holds `raw_line` at its front, so this demands N
/// identical readings in a row including the current one.
fn sequence_matches(raw_line: &str, settings: &PortSettings) -> bool {
    let required = settings.required_identical_count();
    let history = settings.history();
    history.len() >= required && history.iter().take(required).all(|seen| seen == raw_line)
}

/// Normalise the decimal separator and confirm the value is a plain decimal
/// number, optionally signed.
///
/// When a comma is present, dots are treated as thousands separators and
/// dropped. Afterwards at most one separator may remain. Empty input stays
/// empty; anything else that fails becomes [`INVALID_VALUE`].
pub fn validate_numeric(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return String::new();
    }
    if value == INVALID_VALUE {
        return invalid();
    }

    let normalised: String = if value.contains(',') {
        value.chars().filter(|c| *c != '.').collect()
    } else {
        value.to_string()
    };

    let unsigned = normalised
        .strip_prefix(|c: char| c == '-' || c == '+')
        .unwrap_or(&normalised);
    let separators = unsigned.chars().filter(|c| *c == '.' || *c == ',').count();
    let digits = unsigned.chars().filter(char::is_ascii_digit).count();
    if separators > 1 || digits == 0 || digits + separators != unsigned.len() {
        return invalid();
    }

    match normalised.replace(',', ".").parse::<f64>() {
        Ok(number) if number.is_finite() => normalised,
        _ => invalid(),
    }
}

/// What the reader loop stores as the latest value for a raw line.
pub fn process_and_validate(raw_line: &str, settings: &PortSettings, reading_active: bool) -> String {
    validate_numeric(&process(raw_line, settings, reading_active))
}

/// Payload written to a client for the current value, or `None` while the
/// server should leave pending clients waiting.
pub fn transmit_payload(value: &str, broadcast_invalid: bool) -> Option<String> {
    let value = validate_numeric(value);
    if value.is_empty() || value == INVALID_VALUE {
        broadcast_invalid.then(invalid)
    } else {
        Some(value)
    }
}
