pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    pub(crate) fn invalid_code(kind: &str, value: impl std::fmt::Display) -> Self {
        Self::Parse(format!("invalid {} code: {}", kind, value))
    }
}
