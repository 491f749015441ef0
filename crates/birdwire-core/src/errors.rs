/// Core error type for birdwire.
///
/// Decoders and resolvers report malformed payloads as `Parse`; the binary maps
/// everything else into this type at its edge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn missing(key: &str) -> Self {
        Error::Parse(format!("missing required field `{key}`"))
    }

    pub(crate) fn wrong_type(key: &str, expected: &str) -> Self {
        Error::Parse(format!("field `{key}` is not {expected}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
