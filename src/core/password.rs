use std::fmt;
use std::str::FromStr;
use crate::common::error::{AttendanceError, Result};

pub const CODE_LENGTH: usize = 6;

/// A six-digit instant attendance code, checked before it goes anywhere near
/// the network.
#[derive(Clone, PartialEq, Eq)]
pub struct InstantCode(String);

impl InstantCode {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AttendanceError::Validation(
                "Please enter the attendance password".into(),
            ));
        }
        if trimmed.len() != CODE_LENGTH || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AttendanceError::Validation(
                "Password must be exactly 6 digits".into(),
            ));
        }
        Ok(InstantCode(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for InstantCode {
    type Err = AttendanceError;

    fn from_str(s: &str) -> Result<Self> {
        InstantCode::parse(s)
    }
}

impl fmt::Display for InstantCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Codes end up in logs through Debug; keep them out.
impl fmt::Debug for InstantCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InstantCode(******)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_six_digits_with_whitespace() {
        let code = InstantCode::parse(" 123456 \n").unwrap();
        assert_eq!(code.as_str(), "123456");
        assert_eq!(code.to_string(), "123456");
    }

    #[test]
    fn rejects_wrong_lengths_and_non_digits() {
        for bad in ["12345", "1234567", "12a456", "12 456", "١٢٣٤٥٦"] {
            let err = InstantCode::parse(bad).unwrap_err();
            match err {
                AttendanceError::Validation(msg) => assert_eq!(msg, "Password must be exactly 6 digits"),
                other => panic!("unexpected error for {:?}: {:?}", bad, other),
            }
        }
    }

    #[test]
    fn empty_input_asks_for_the_password() {
        let err = InstantCode::parse("   ").unwrap_err();
        assert!(matches!(err, AttendanceError::Validation(ref m) if m.contains("enter the attendance password")));
    }

    #[test]
    fn debug_output_is_redacted() {
        let code: InstantCode = "654321".parse().unwrap();
        assert!(!format!("{:?}", code).contains("654321"));
    }
}
