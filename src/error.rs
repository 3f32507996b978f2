//! Error taxonomy of the recognition pipeline.
//!
//! Expected outcomes like "no hand in the frame" are *not* errors; they are reported as
//! [`GestureResult::Rejected`]. The variants here either describe bad input at the request boundary
//! ([`Error::InvalidInput`]) or a broken contract between the pipeline and its models, which means
//! the deployment is misconfigured.
//!
//! [`GestureResult::Rejected`]: crate::pipeline::GestureResult::Rejected

use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
    /// Missing, malformed, or undecodable frame data.
    InvalidInput {
        field: Option<&'static str>,
        message: String,
    },
    /// The detector handed us a hand without any landmarks, or with non-finite coordinates.
    InvalidLandmarks(String),
    /// The classifier returned no usable scores, or a different number than there are labels.
    InvalidDistribution(String),
    /// The classifier picked a class the vocabulary doesn't know about.
    LabelIndexOutOfRange { index: usize, len: usize },
    /// The detector or classifier failed to run.
    Backend(anyhow::Error),
}

impl Error {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput {
            field: None,
            message: message.into(),
        }
    }

    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidInput {
            field: Some(field),
            message: message.into(),
        }
    }

    /// Returns `true` if the error was caused by the caller's input rather than by the deployment.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidInput {
                field: Some(field),
                message,
            } => write!(f, "invalid input in field `{field}`: {message}"),
            Error::InvalidInput {
                field: None,
                message,
            } => write!(f, "invalid input: {message}"),
            Error::InvalidLandmarks(msg) => write!(f, "invalid landmarks: {msg}"),
            Error::InvalidDistribution(msg) => write!(f, "invalid prediction distribution: {msg}"),
            Error::LabelIndexOutOfRange { index, len } => write!(
                f,
                "label index {index} is out of range for a vocabulary of {len} labels"
            ),
            Error::Backend(err) => write!(f, "inference backend error: {err:#}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Backend(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Backend(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors() {
        assert!(Error::invalid_field("image", "missing").is_client_error());
        assert!(Error::invalid_input("bad bytes").is_client_error());
        assert!(!Error::InvalidDistribution("empty".into()).is_client_error());
        assert!(!Error::LabelIndexOutOfRange { index: 3, len: 3 }.is_client_error());
        assert!(!Error::Backend(anyhow::anyhow!("boom")).is_client_error());
    }

    #[test]
    fn display() {
        assert_eq!(
            Error::invalid_field("image", "Missing image data").to_string(),
            "invalid input in field `image`: Missing image data",
        );
        assert_eq!(
            Error::LabelIndexOutOfRange { index: 5, len: 3 }.to_string(),
            "label index 5 is out of range for a vocabulary of 3 labels",
        );
    }
}
