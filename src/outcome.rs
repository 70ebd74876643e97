use std::fmt;

use serde::Serialize;

use crate::error::{ErrorKind, IngestError};

pub const NO_CHANGES_MESSAGE: &str = "no changes detected in the provided data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Process,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Process => "process",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one engine call. Built fresh for every call and handed back by
/// value; nothing keeps a reference to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub status: Status,
    pub status_code: u16,
    pub operation: Operation,
    pub affected_row_count: usize,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl Outcome {
    pub fn success(operation: Operation, affected_row_count: usize, message: Option<String>) -> Self {
        Self {
            status: Status::Success,
            status_code: 200,
            operation,
            affected_row_count,
            message,
            error: None,
        }
    }

    pub fn no_changes() -> Self {
        Self::success(Operation::Process, 0, Some(NO_CHANGES_MESSAGE.to_string()))
    }

    pub fn failure(operation: Operation, error: &IngestError) -> Self {
        let kind = error.kind();
        Self {
            status: Status::Failure,
            status_code: kind.status_code(),
            operation,
            affected_row_count: 0,
            message: Some(error.to_string()),
            error: Some(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}
