//! Error handling for regionflow
//!
//! Engine code reports [`PipelineError`]; everything above the engine
//! (configuration, the demo binary) uses [`RegionflowError`], which wraps it.

use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Main error type for regionflow operations
#[derive(Error, Debug)]
pub enum RegionflowError {
    /// Errors raised by the pipeline engine or a node
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RegionflowError>,
    },
}

impl RegionflowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RegionflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost pipeline error, if this error wraps one.
    pub fn pipeline_error(&self) -> Option<&PipelineError> {
        match self {
            RegionflowError::Pipeline(e) => Some(e),
            RegionflowError::WithContext { source, .. } => source.pipeline_error(),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for RegionflowError {
    fn from(e: toml::de::Error) -> Self {
        RegionflowError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for RegionflowError {
    fn from(e: toml::ser::Error) -> Self {
        RegionflowError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for RegionflowError {
    fn from(e: serde_json::Error) -> Self {
        RegionflowError::Serialization(e.to_string())
    }
}

/// Result type alias for regionflow operations
pub type Result<T> = std::result::Result<T, RegionflowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| RegionflowError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| RegionflowError::from(e).with_context(f()))
    }
}
