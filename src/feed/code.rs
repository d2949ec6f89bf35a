//! Item code normalization and validation
//!
//! Codes are letters or digits from any script, 3 to 12 characters.

use thiserror::Error;

pub const MIN_CODE_CHARS: usize = 3;
pub const MAX_CODE_CHARS: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("code is empty")]
    Empty,
    #[error("code must be 3-12 characters, got {0}")]
    Length(usize),
    #[error("code contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Strip all whitespace (leading, trailing and internal) and uppercase
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace().collect::<String>().to_uppercase()
}

/// Check an already-normalized code
pub fn validate(code: &str) -> Result<(), CodeError> {
    if code.is_empty() {
        return Err(CodeError::Empty);
    }
    let chars = code.chars().count();
    if !(MIN_CODE_CHARS..=MAX_CODE_CHARS).contains(&chars) {
        return Err(CodeError::Length(chars));
    }
    if let Some(bad) = code.chars().find(|c| !c.is_alphanumeric()) {
        return Err(CodeError::InvalidChar(bad));
    }
    Ok(())
}

/// Normalize then validate
pub fn parse(raw: &str) -> Result<String, CodeError> {
    let code = normalize(raw);
    validate(&code)?;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_and_uppercases() {
        assert_eq!(normalize("  ab c 12 "), "ABC12");
        assert_eq!(normalize("\tx\ny z"), "XYZ");
    }

    #[test]
    fn test_parse_accepts_multi_script_codes() {
        assert_eq!(parse("灵宝001").unwrap(), "灵宝001");
        assert_eq!(parse("abc").unwrap(), "ABC");
        assert_eq!(parse("A1B2C3D4E5F6").unwrap(), "A1B2C3D4E5F6");
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // 12 CJK characters is 36 bytes but still valid
        let code = "灵".repeat(12);
        assert!(validate(&code).is_ok());
        assert_eq!(validate(&"灵".repeat(13)), Err(CodeError::Length(13)));
        assert_eq!(validate("AB"), Err(CodeError::Length(2)));
    }

    #[test]
    fn test_rejects_punctuation() {
        assert_eq!(parse("AB-C"), Err(CodeError::InvalidChar('-')));
        assert_eq!(parse("   "), Err(CodeError::Empty));
    }
}
