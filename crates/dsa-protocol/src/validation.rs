//! Stock code validation.
//!
//! Accepted forms:
//! - A-share: six digits, optionally prefixed `SH`, `SZ` or `BJ`
//! - Hong Kong: five digits, optionally prefixed `HK`
//! - US: one to five letters, optionally followed by `.` and a one or two
//!   letter share class (`BRK.B`)

use crate::error::ValidationError;

/// Validate a stock code and return its normalized (trimmed, upper-cased)
/// form.
pub fn validate_stock_code(raw: &str) -> Result<String, ValidationError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.is_empty() {
        return Err(ValidationError::Empty);
    }

    if is_a_share(&code) || is_hong_kong(&code) || is_us_ticker(&code) {
        Ok(code)
    } else {
        Err(ValidationError::Malformed(code))
    }
}

fn all_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}

fn all_letters(s: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_uppercase())
}

fn is_a_share(code: &str) -> bool {
    let digits = ["SH", "SZ", "BJ"]
        .iter()
        .find_map(|p| code.strip_prefix(p))
        .unwrap_or(code);
    all_digits(digits, 6)
}

fn is_hong_kong(code: &str) -> bool {
    all_digits(code.strip_prefix("HK").unwrap_or(code), 5)
}

fn is_us_ticker(code: &str) -> bool {
    match code.split_once('.') {
        Some((symbol, class)) => all_letters(symbol, 1, 5) && all_letters(class, 1, 2),
        None => all_letters(code, 1, 5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_market_forms() {
        for code in ["600519", "sh600519", "SZ000001", "00700", "hk00700", "aapl", "BRK.B", "T"] {
            assert!(validate_stock_code(code).is_ok(), "{code} should be valid");
        }
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(validate_stock_code("  aapl \n").unwrap(), "AAPL");
        assert_eq!(validate_stock_code("sh600519").unwrap(), "SH600519");
    }

    #[test]
    fn rejects_malformed() {
        for code in ["6005190", "AAPLXX", "12AB", "BRK.", "HK0070", "600 519"] {
            assert_eq!(
                validate_stock_code(code),
                Err(ValidationError::Malformed(code.trim().to_ascii_uppercase())),
                "{code} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(validate_stock_code("   "), Err(ValidationError::Empty));
    }
}
