use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Problems found while loading configuration. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("layout '{0}' is not defined")]
    UnknownLayout(String),

    #[error("routine '{0}' is not defined")]
    UnknownRoutine(String),

    #[error("task '{0}' is not registered")]
    UnknownTask(String),

    #[error("layout '{layout}' has no template '{key}'")]
    UnknownTemplate { layout: String, key: String },

    #[error("layout '{layout}' has no button '{key}'")]
    UnknownButton { layout: String, key: String },

    #[error("layout '{layout}' lacks template '{key}' needed by task '{task}'")]
    MissingTaskTemplate {
        layout: String,
        task: String,
        key: String,
    },

    #[error("template '{key}' is required by task '{task}' but disabled in layout '{layout}'")]
    RequiredTemplateDisabled {
        layout: String,
        task: String,
        key: String,
    },

    #[error("layout '{layout}': key '{key}' is defined more than once")]
    DuplicateKey { layout: String, key: String },

    #[error("layout '{layout}': invalid key '{key}'")]
    InvalidKey { layout: String, key: String },

    #[error("layout '{layout}': {detail}")]
    InvalidEntry { layout: String, detail: String },

    #[error("instance '{0}' is defined more than once")]
    DuplicateInstance(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// Persistence collaborator failure. The task pauses and the operator sees it.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker store unavailable at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tracker store at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("tracker store unavailable: {0}")]
    Unavailable(String),
}

/// Why a single step attempt failed. Retried within the step's budget.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepFailure {
    #[error("none of {keys:?} appeared within {timeout:?}")]
    DetectionTimeout { keys: Vec<String>, timeout: Duration },

    #[error("{action} issued but {expected} not observed within {timeout:?}")]
    ActionUnconfirmed {
        action: String,
        expected: String,
        timeout: Duration,
    },

    #[error("screen capture failed: {0}")]
    Capture(String),

    #[error("input injection failed: {0}")]
    Input(String),

    #[error("layout lookup failed: {0}")]
    Layout(String),
}

impl StepFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            StepFailure::DetectionTimeout { .. } => "DetectionTimeout",
            StepFailure::ActionUnconfirmed { .. } => "ActionUnconfirmed",
            StepFailure::Capture(_) => "CaptureFailed",
            StepFailure::Input(_) => "InputFailed",
            StepFailure::Layout(_) => "LayoutLookup",
        }
    }
}

/// Reason recorded with an `Aborted` terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// Retry budget of `step` ran out; `failure` is the last failed attempt.
    RetriesExhausted { step: String, failure: StepFailure },
    /// Operator requested a stop.
    Cancelled,
    /// The tracker could not be consulted before the run.
    TrackerUnavailable(String),
    /// The run exceeded its overall deadline.
    RunDeadline(Duration),
    /// The task itself decided the run cannot continue.
    Task { step: String, detail: String },
}

impl AbortReason {
    /// Short machine-readable tag, e.g. `ActionUnconfirmed`.
    pub fn kind(&self) -> &'static str {
        match self {
            AbortReason::RetriesExhausted { failure, .. } => failure.kind(),
            AbortReason::Cancelled => "Cancelled",
            AbortReason::TrackerUnavailable(_) => "TrackerUnavailable",
            AbortReason::RunDeadline(_) => "RunDeadline",
            AbortReason::Task { .. } => "TaskAbort",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::RetriesExhausted { step, failure } => {
                write!(f, "{} at step {}: {}", failure.kind(), step, failure)
            }
            AbortReason::Cancelled => write!(f, "cancelled by operator"),
            AbortReason::TrackerUnavailable(e) => write!(f, "tracker unavailable: {}", e),
            AbortReason::RunDeadline(d) => write!(f, "run exceeded {:?}", d),
            AbortReason::Task { step, detail } => write!(f, "step {}: {}", step, detail),
        }
    }
}
