//! Panel error type.

use thiserror::Error;

pub type PanelResult<T> = Result<T, PanelError>;

/// Any failed panel call: non-2xx status, transport failure, or an
/// unreadable response body.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}", self.describe())]
pub struct PanelError {
    /// HTTP status returned by the panel, when there was one.
    pub status: Option<u16>,
    pub message: String,
}

impl PanelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    fn describe(&self) -> String {
        match self.status {
            Some(code) => format!("panel error (status {code}): {}", self.message),
            None => format!("panel error: {}", self.message),
        }
    }
}

impl From<reqwest::Error> for PanelError {
    fn from(e: reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            format!("request timed out: {e}")
        } else if e.is_decode() {
            format!("malformed response: {e}")
        } else {
            e.to_string()
        };
        Self {
            status: e.status().map(|s| s.as_u16()),
            message,
        }
    }
}

impl From<serde_json::Error> for PanelError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("malformed response: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_status_when_present() {
        let err = PanelError::with_status(422, "allocation already assigned");
        assert_eq!(
            err.to_string(),
            "panel error (status 422): allocation already assigned"
        );
        assert_eq!(PanelError::new("boom").to_string(), "panel error: boom");
    }

    #[test]
    fn not_found_detection() {
        assert!(PanelError::with_status(404, "gone").is_not_found());
        assert!(!PanelError::new("gone").is_not_found());
    }
}
