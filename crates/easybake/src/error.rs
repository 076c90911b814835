use thiserror::Error;

/// Fatal errors surfaced to callers of the oven.
///
/// Everything else in the baking pipeline degrades gracefully: invalid
/// selectors, unknown declarations and bad expression values are logged and
/// skipped so the rest of the document can still be produced.
#[derive(Debug, Error)]
pub enum BakeError {
    /// The recipe stylesheet could not be parsed at all.
    #[error("stylesheet parse error at {line}:{column}: {message}")]
    StylesheetParse {
        line: u32,
        column: u32,
        message: String,
    },

    /// Reading or writing a document failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BakeResult<T> = Result<T, BakeError>;
