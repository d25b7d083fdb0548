pub use config::Config;
pub use engine::{
    ExecutionEngine, ExecutionResult, ExecutionStatus, FailureKind, InvocationVia, ProgressEvent,
    ProgressSender,
};
pub use error::{InvokeError, PathDenyReason};
pub use invoker::{AnalysisScope, AnalysisType, CodeSource, Invoker, Request};
pub use models::{ModelChoice, ModelSelector, ModelTier, TaskType};
pub use paths::{PathKind, PathValidator, ValidatedPath};
pub use redaction::redact_sensitive_text;
pub use sanitize::{sanitize, SanitizedPrompt};

pub mod config;
pub mod engine;
pub mod error;
pub mod invoker;
pub mod models;
pub mod paths;
pub mod redaction;
pub mod sanitize;
