/// First `max` characters of `s`, never splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Trailing `n` ASCII digits of a phone number, ignoring punctuation.
pub fn last_digits(number: &str, n: usize) -> String {
    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();
    digits[digits.len().saturating_sub(n)..].iter().collect()
}
