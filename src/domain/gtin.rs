//! GTIN / EAN validation
//!
//! A GTIN is an 8, 12, 13 or 14 digit code whose last digit is a modulo-10
//! check digit. Weights alternate 3/1 starting from the digit right next to
//! the check digit.

/// Lengths accepted as GTIN-8, UPC-A (GTIN-12), EAN-13 and GTIN-14.
pub const GTIN_LENGTHS: [usize; 4] = [8, 12, 13, 14];

/// Compute the check digit for the digits that precede it.
///
/// Returns `None` when `body` is empty or contains a non-digit.
pub fn gtin_check_digit(body: &str) -> Option<u32> {
    if body.is_empty() {
        return None;
    }

    let mut sum = 0;
    for (position, ch) in body.chars().rev().enumerate() {
        let digit = ch.to_digit(10)?;
        let weight = if position % 2 == 0 { 3 } else { 1 };
        sum += digit * weight;
    }

    Some((10 - sum % 10) % 10)
}

/// `true` for exactly the 8/12/13/14 digit strings with a correct check digit.
pub fn is_valid_gtin(code: &str) -> bool {
    if !GTIN_LENGTHS.contains(&code.len()) || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let (body, check) = code.split_at(code.len() - 1);
    match (gtin_check_digit(body), check.chars().next().and_then(|c| c.to_digit(10))) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => false,
    }
}

/// Strip the separators sites like to put in barcodes ("4006381 333931",
/// "400-6381-33393-1") and return the code only if it validates.
pub fn clean_gtin(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.'))
        .collect();

    is_valid_gtin(&cleaned).then_some(cleaned)
}
