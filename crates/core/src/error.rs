use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Terminal failures of a function pass. Every variant ends up as a fatal
/// result; none of them is fixed by invoking again with the same inputs.
#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("cannot read {field} field of {kind}")]
    MissingField { kind: String, field: String },

    #[error("{field} field of {kind} must be a {expected}")]
    TypeMismatch { kind: String, field: String, expected: &'static str },

    #[error("expected {expected}, got {found}")]
    UnexpectedKind { expected: String, found: String },

    #[error("dependent {kind} not available: {reference}")]
    Unsatisfiable { kind: String, reference: String },

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("cannot decode {what}")]
    Encoding {
        what: String,
        #[source]
        source: BoxError,
    },

    #[error("cannot decode {what}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot convert {what} to a composed resource")]
    Compose {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FunctionError {
    pub fn missing(kind: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField { kind: kind.into(), field: field.into() }
    }

    pub fn encoding(what: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Encoding { what: what.into(), source: source.into() }
    }
}
