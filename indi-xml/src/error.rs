//! Error types for XML framing and parsing

use thiserror::Error;

/// Errors that can occur while framing or parsing an element
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XmlError {
    /// A close tag arrived while no element was open
    #[error("Unexpected close tag at top level")]
    UnexpectedCloseTag,

    /// A completed element could not be parsed
    #[error("XML parse failed: {0}")]
    ParseFailed(String),

    /// Element text or attribute was not valid UTF-8
    #[error("Invalid UTF-8 in element: {0}")]
    InvalidUtf8(String),

    /// The framed bytes held no element
    #[error("No element found in framed input")]
    EmptyElement,

    /// Close tag did not match the open element
    #[error("Mismatched close tag: expected </{expected}>, found </{found}>")]
    MismatchedCloseTag {
        /// Tag that was open
        expected: String,
        /// Tag that closed it
        found: String,
    },
}

impl From<quick_xml::Error> for XmlError {
    fn from(err: quick_xml::Error) -> Self {
        XmlError::ParseFailed(err.to_string())
    }
}

impl From<std::str::Utf8Error> for XmlError {
    fn from(err: std::str::Utf8Error) -> Self {
        XmlError::InvalidUtf8(err.to_string())
    }
}

/// Result type alias for XML operations
pub type XmlResult<T> = Result<T, XmlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            XmlError::UnexpectedCloseTag.to_string(),
            "Unexpected close tag at top level"
        );

        let error = XmlError::MismatchedCloseTag {
            expected: "defNumberVector".to_string(),
            found: "oneNumber".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Mismatched close tag: expected </defNumberVector>, found </oneNumber>"
        );
    }
}
