use std::fmt::Display;
use std::ops::Deref;
use std::str::FromStr;

use rand::distributions::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const LENGTH: usize = 6;

/// A one-time login code, sent by email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Code([u8; LENGTH]);

impl Code {
    /// Generate a random code.
    pub fn random() -> Self {
        let mut digits = [0; LENGTH];
        let digit_dist = Uniform::from(0..=9);
        let mut rng = rand::thread_rng();
        for digit in &mut digits {
            *digit = digit_dist.sample(&mut rng);
        }
        Self(digits)
    }
}

impl Deref for Code {
    type Target = [u8; LENGTH];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for Code {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for digit in self.0 {
            write!(formatter, "{digit}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("code must contain exactly {LENGTH} characters, got {0}")]
    InvalidLength(usize),
    #[error("code must contain only digits, found '{0}'")]
    InvalidChar(char),
}

impl FromStr for Code {
    type Err = ParseError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let string = string.trim();
        let len = string.chars().count();
        if len != LENGTH {
            return Err(ParseError::InvalidLength(len));
        }
        let mut digits = [0; LENGTH];
        for (slot, c) in digits.iter_mut().zip(string.chars()) {
            *slot = c
                .to_digit(10)
                .ok_or(ParseError::InvalidChar(c))
                .map(|d| d as u8)?;
        }
        Ok(Self(digits))
    }
}

impl TryFrom<String> for Code {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.to_string()
    }
}

#[cfg(test)]
mod tests {
    use rocket::serde::json::serde_json;

    use super::*;

    #[test]
    fn random_codes_are_six_digits() {
        for _ in 0..100 {
            let code = Code::random();
            let text = code.to_string();
            assert_eq!(text.len(), LENGTH);
            assert!(text.chars().all(|c| c.is_ascii_digit()));
            assert!(code.iter().all(|d| *d <= 9));
        }
    }

    #[test]
    fn leading_zeros_survive_parsing() {
        let code: Code = "000042".parse().unwrap();
        assert_eq!(*code, [0, 0, 0, 0, 4, 2]);
        assert_eq!(code.to_string(), "000042");
    }

    #[test]
    fn bad_codes_are_rejected() {
        assert_eq!("12345".parse::<Code>(), Err(ParseError::InvalidLength(5)));
        assert_eq!("1234567".parse::<Code>(), Err(ParseError::InvalidLength(7)));
        assert_eq!("12a456".parse::<Code>(), Err(ParseError::InvalidChar('a')));
    }

    #[test]
    fn serializes_as_a_string() {
        let code: Code = "908172".parse().unwrap();
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"908172\"");
        let back: Code = serde_json::from_str("\"908172\"").unwrap();
        assert_eq!(back, code);
        assert!(serde_json::from_str::<Code>("\"9081\"").is_err());
    }
}
