use thiserror::Error;

/// Failure of a single synthesis call. Every variant is recovered the same way:
/// the node falls back to a linear blend of its bounding frames.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("numeric failure: {0}")]
    NumericFailure(String),

    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

impl SynthesisError {
    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    pub fn numeric(msg: impl Into<String>) -> Self {
        Self::NumericFailure(msg.into())
    }
}

/// Fatal failure of an interpolation run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("source error: {0:#}")]
    Source(anyhow::Error),

    #[error("sink error: {0:#}")]
    Sink(anyhow::Error),
}

impl RunError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type RunResult<T> = Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(SynthesisError::model_unavailable("x")
            .to_string()
            .starts_with("model unavailable:"));
        assert!(SynthesisError::numeric("x")
            .to_string()
            .starts_with("numeric failure:"));
        assert!(RunError::config("x")
            .to_string()
            .starts_with("configuration error:"));
    }

    #[test]
    fn io_errors_keep_their_context_chain() {
        let base: anyhow::Result<()> = Err(std::io::Error::other("broken pipe").into());
        let err = RunError::Sink(base.context("failed to write frame").unwrap_err());
        let msg = err.to_string();
        assert!(msg.contains("failed to write frame"));
        assert!(msg.contains("broken pipe"));
    }
}
