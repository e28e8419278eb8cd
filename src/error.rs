use serde::Serialize;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("{message}")]
    ExternalToolFailure {
        message: String,
        details: ProcessErrorDetails,
    },
    #[error("malformed state file {path}: {message}")]
    MalformedState { path: String, message: String },
    #[error("locking unsupported for {path}: {reason}")]
    LockingUnsupported { path: String, reason: String },
    #[error("missing required input: {0}")]
    MissingRequiredInput(String),
    #[error("invalid argument combination: {0}")]
    InvalidArgumentCombination(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessErrorDetails {
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_stderr: Option<String>,
}

impl FleetError {
    pub fn process_details(&self) -> Option<&ProcessErrorDetails> {
        match self {
            FleetError::ExternalToolFailure { details, .. } => Some(details),
            _ => None,
        }
    }
}
