use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("structural error: {0}")]
    Structural(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cannot parse document {filename}: {reason}")]
    ContentParse { filename: String, reason: String },

    #[error("{operation} failed: {message}")]
    RemoteCall { operation: String, message: String },

    #[error("link markup not found in {filename}: {url}")]
    LinkNotFound { filename: String, url: String },
}

impl MigrationError {
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Structural(_) | Self::InvalidInput(_))
    }
}

#[cfg(test)]
mod tests {
    use super::MigrationError;

    #[test]
    fn only_structural_and_invalid_input_are_fatal() {
        assert!(MigrationError::structural("unknown category").is_fatal());
        assert!(MigrationError::InvalidInput("empty offset".to_string()).is_fatal());
        assert!(
            !MigrationError::ContentParse {
                filename: "a.html".to_string(),
                reason: "missing title".to_string(),
            }
            .is_fatal()
        );
        assert!(
            !MigrationError::RemoteCall {
                operation: "create page".to_string(),
                message: "HTTP 500".to_string(),
            }
            .is_fatal()
        );
    }

    #[test]
    fn messages_name_the_failing_item() {
        let error = MigrationError::LinkNotFound {
            filename: "intro.html".to_string(),
            url: "https://example.org/x.png".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "link markup not found in intro.html: https://example.org/x.png"
        );
    }
}
