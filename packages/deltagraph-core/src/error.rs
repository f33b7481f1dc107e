use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Two concurrent deltas that cannot both be causally valid.
    #[error("protocol invariant violated on {type_name}/{oid}: {reason}")]
    InvariantViolation {
        type_name: String,
        oid: String,
        reason: String,
    },
    #[error("object {type_name}/{oid} carries no event for its own type")]
    MissingEvent { type_name: String, oid: String },
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("unknown version: {0}")]
    UnknownVersion(String),
    #[error("version graph has been torn down")]
    TornDown,
    #[error("custom merge for {type_name}/{oid} failed: {reason}")]
    CustomMerge {
        type_name: String,
        oid: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invariant(type_name: &str, oid: &str, reason: impl Into<String>) -> Self {
        Error::InvariantViolation {
            type_name: type_name.to_string(),
            oid: oid.to_string(),
            reason: reason.into(),
        }
    }
}
