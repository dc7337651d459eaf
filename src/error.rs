use std::path::PathBuf;

/// Failures a run can hit, split by how far they reach.
///
/// `Configuration` and `DependencyMissing` abort the run before any work
/// starts. `Category` and `SampleCounting` are recorded in the run report
/// and the run continues without the affected unit.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("required program '{program}' not found in PATH")]
    DependencyMissing { program: String },

    #[error("category '{category}' failed: {reason}")]
    Category { category: String, reason: String },

    #[error("counting failed for sample '{sample}' in category '{category}': {reason}")]
    SampleCounting {
        category: String,
        sample: String,
        reason: String,
    },
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Configuration error for a required path that does not exist.
    pub fn missing_path(what: &str, path: impl Into<PathBuf>) -> Self {
        Self::Configuration(format!("{} not found: {}", what, path.into().display()))
    }

    /// True for errors that must stop the run before any category starts.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::DependencyMissing { .. })
    }
}
