//! crates/nipo_core/src/token.rs
//!
//! The attendance token string: `NIPO_AULA_<sequence-number>_<suffix>`.

use std::fmt;
use std::str::FromStr;

const PREFIX: [&str; 2] = ["NIPO", "AULA"];

/// Why a string is not a well-formed attendance token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenFormatError {
    #[error("expected at least 4 '_'-separated segments, found {0}")]
    TooFewSegments(usize),
    #[error("token must start with NIPO_AULA_")]
    BadPrefix,
    #[error("class number '{0}' is not numeric")]
    BadNumber(String),
    #[error("token suffix is empty")]
    EmptySuffix,
}

/// A parsed attendance token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceToken {
    pub class_number: i32,
    pub suffix: String,
}

impl AttendanceToken {
    pub fn new(class_number: i32, suffix: impl Into<String>) -> Self {
        Self {
            class_number,
            suffix: suffix.into(),
        }
    }
}

impl FromStr for AttendanceToken {
    type Err = TokenFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The suffix is opaque and may itself contain underscores.
        let segments: Vec<&str> = s.splitn(4, '_').collect();
        if segments.len() < 4 {
            return Err(TokenFormatError::TooFewSegments(segments.len()));
        }
        if segments[..2] != PREFIX {
            return Err(TokenFormatError::BadPrefix);
        }

        let number = segments[2];
        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TokenFormatError::BadNumber(number.to_string()));
        }
        let class_number = number
            .parse::<i32>()
            .map_err(|_| TokenFormatError::BadNumber(number.to_string()))?;

        if segments[3].is_empty() {
            return Err(TokenFormatError::EmptySuffix);
        }

        Ok(Self {
            class_number,
            suffix: segments[3].to_string(),
        })
    }
}

impl fmt::Display for AttendanceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NIPO_AULA_{}_{}", self.class_number, self.suffix)
    }
}
