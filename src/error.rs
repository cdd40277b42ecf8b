//! Error types for request dispatch.

use thiserror::Error;

/// The stub registry could not evaluate a match.
///
/// "No stub matched" is not an error; it is the not-configured definition.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("stub registry unavailable: {0}")]
    Unavailable(String),
}

/// A response definition could not be turned into a response.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown response transformer: {0}")]
    UnknownTransformer(String),

    #[error("failed to read body file {path}")]
    BodySource {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid response body: {0}")]
    InvalidBody(String),

    #[error("response transformer {name} failed")]
    Transformer {
        name: String,
        #[source]
        source: TransformError,
    },
}

/// Failure raised by a response transformer.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("template error: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A request could not be handled.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("stub matching failed")]
    Match(#[from] MatchError),

    #[error("response rendering failed")]
    Render(#[from] RenderError),
}
