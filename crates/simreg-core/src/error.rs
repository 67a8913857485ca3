//! Error taxonomy for the regression engine.
//!
//! Only configuration-class errors abort a whole run; build and simulation
//! failures are confined to the work item that produced them and surface as
//! `ERROR` verdicts in that item's outcome.

/// Errors produced while validating descriptor and test-declaration files.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("{file}: {message}")]
    Malformed { file: String, message: String },

    #[error("{file}: invalid address literal '{value}' (expected 0x-prefixed hex)")]
    BadAddress { file: String, value: String },

    #[error("{file}: invalid size literal '{value}' (expected e.g. \"64K\")")]
    BadSize { file: String, value: String },

    #[error("{file}: UART base {uart:#010x} overlaps RAM region {base:#010x}..{end:#010x}")]
    UartOverlapsRam { file: String, uart: u32, base: u32, end: u64 },

    #[error("{file}: word size {word_size} is not supported (expected 1, 2, 4, or 8)")]
    BadWordSize { file: String, word_size: u32 },
}

/// Regression engine errors.
#[derive(Debug, thiserror::Error)]
pub enum RegressionError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("build failed for {project} on {core}: {message}{}", fmt_stderr(.stderr))]
    Build {
        project: String,
        core: String,
        message: String,
        stderr: String,
    },

    #[error("memory image for {project} exceeds {core} RAM: {image_bytes} bytes > {ram_bytes} bytes")]
    ImageTooLarge {
        project: String,
        core: String,
        image_bytes: usize,
        ram_bytes: usize,
    },

    #[error("simulation error on {core}: {message}")]
    Simulation { core: String, message: String },

    #[error("failed to launch '{tool}': {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("external tool '{tool}' exceeded its {timeout_secs}s wall-clock budget")]
    Watchdog { tool: String, timeout_secs: u64 },

    #[error("report error: {0}")]
    Report(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RegressionError {
    /// Shorthand for a name-lookup miss.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Whether this error must abort the whole run rather than one item.
    ///
    /// Matches the fail-fast rule: only configuration-class problems
    /// detected before execution are fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Configuration(_) | Self::Schema(_)
        )
    }
}

fn fmt_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{trimmed}")
    }
}

/// Result type for regression engine operations.
pub type Result<T> = std::result::Result<T, RegressionError>;
