// error.rs

use thiserror::Error;

/// Every failure the QC core can raise. Messages always name the offending
/// labels, values or counts.
#[derive(Debug, Error)]
pub enum QcError {
    #[error("schema error: {0}")]
    Schema(String),

    #[error("structure error: {0}")]
    Structure(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("range error: {0}")]
    Range(String),

    #[error("missing data: {0}")]
    MissingData(String),

    #[error("uniqueness error: {0}")]
    Uniqueness(String),

    #[error("cardinality error: {0}")]
    Cardinality(String),

    #[error("ordering error: {0}")]
    Ordering(String),

    #[error("alignment error: {0}")]
    Alignment(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("unknown condition: no rule matches sample_id '{sample_id}'")]
    UnknownCondition { sample_id: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("numeric error: {0}")]
    Numeric(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QcError>;

impl From<csv::Error> for QcError {
    fn from(err: csv::Error) -> Self {
        let message = err.to_string();
        match err.into_kind() {
            csv::ErrorKind::Io(e) => QcError::Io(e),
            _ => QcError::Format(format!("malformed delimited text: {}", message)),
        }
    }
}

/// Renders a label list as `[a, b, c]` for error messages.
pub(crate) fn label_list<I, S>(labels: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined: Vec<String> = labels
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect();
    format!("[{}]", joined.join(", "))
}
