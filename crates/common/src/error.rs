//! Errors raised while parsing the shared domain vocabulary

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A value outside the closed set the broker uses
    #[error("unknown {kind}: {value}")]
    Unknown { kind: &'static str, value: String },

    #[error("invalid {kind}: {value}")]
    Malformed { kind: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        Self::Unknown {
            kind,
            value: value.into(),
        }
    }

    pub fn malformed(kind: &'static str, value: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_kind() {
        assert_eq!(
            Error::unknown("option right", "XX").to_string(),
            "unknown option right: XX"
        );
        assert_eq!(
            Error::malformed("security id", "12a").to_string(),
            "invalid security id: 12a"
        );
    }
}
