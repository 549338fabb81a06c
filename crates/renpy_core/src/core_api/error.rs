use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreErrorCode {
    Io,
    /// Malformed or unrecognized pickle payload. Never repaired.
    Format,
    /// A replacement value does not fit the target variable.
    Value,
    /// The variable is not in the current index; re-scan and retry.
    NotFound,
    Archive,
    Signing,
    Config,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreError {
    pub code: CoreErrorCode,
    pub message: String,
}

impl CoreError {
    pub fn new(code: CoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::new(CoreErrorCode::Format, message)
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(CoreErrorCode::Value, message)
    }

    pub fn not_found(name: &str) -> Self {
        Self::new(
            CoreErrorCode::NotFound,
            format!("variable '{name}' is not in the current index; re-scan the save and retry"),
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl Error for CoreError {}
