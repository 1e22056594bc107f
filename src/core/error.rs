//! Wire-level error codes.
//!
//! These are the codes a client sees in `ON_ERROR` events. They identify the
//! failure kind; the accompanying message is informational only.

/// Error code carried in `ON_ERROR` events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    GenericError = 0,
    InvalidChannel = 1,
    UnknownSubscription = 2,
    UnknownPublication = 3,
    MalformedCommand = 4,
    /// Internal: log allocation failed or a registry is full. Surfaced to the
    /// client so it can back off rather than retry immediately.
    ResourceExhausted = 5,
}

impl ErrorCode {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::GenericError),
            1 => Some(Self::InvalidChannel),
            2 => Some(Self::UnknownSubscription),
            3 => Some(Self::UnknownPublication),
            4 => Some(Self::MalformedCommand),
            5 => Some(Self::ResourceExhausted),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenericError => "generic_error",
            Self::InvalidChannel => "invalid_channel",
            Self::UnknownSubscription => "unknown_subscription",
            Self::UnknownPublication => "unknown_publication",
            Self::MalformedCommand => "malformed_command",
            Self::ResourceExhausted => "resource_exhausted",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for code in [
            ErrorCode::GenericError,
            ErrorCode::InvalidChannel,
            ErrorCode::UnknownSubscription,
            ErrorCode::UnknownPublication,
            ErrorCode::MalformedCommand,
            ErrorCode::ResourceExhausted,
        ] {
            assert_eq!(ErrorCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ErrorCode::from_code(99), None);
    }
}
