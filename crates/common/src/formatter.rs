//! Recipient normalization.

/// Normalize a phone number to E.164.
///
/// Non-digits are stripped. When the input did not start with `+` and the digits
/// do not already begin with `country_code`, the country code is prepended. The
/// result is always `+` followed by digits, so the function is idempotent.
/// Malformed input is never rejected; it passes through stripped of punctuation.
pub fn format_phone_number(raw: &str, country_code: &str) -> String {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    if trimmed.starts_with('+') || digits.starts_with(country_code) {
        format!("+{digits}")
    } else {
        format!("+{country_code}{digits}")
    }
}

/// Trim and lower-case an email address.
pub fn format_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}
