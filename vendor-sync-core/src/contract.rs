//! # contract: interfaces of every external collaborator
//!
//! The synchronisation core never talks to a server, a schema engine or a
//! spreadsheet directly. It consumes the traits below:
//!
//! - [`Connector`] opens a [`RemoteClient`] session for a named connection.
//! - [`RemoteClient`] lists, describes, fetches and uploads files.
//! - [`RecordValidator`] checks one decoded MARC record.
//! - [`ReportSink`] appends rows to a reporting range.
//!
//! ## Mocking & Testing
//! - The traits are annotated for `mockall` so consumers can generate
//!   deterministic mocks (`MockRemoteClient`, `MockReportSink`, ...) with the
//!   `test-export-mocks` feature.
//!
//! ## Errors
//! - [`RemoteError`] covers connectivity, authentication and I/O against a
//!   remote. It is vendor-fatal.
//! - [`SinkError`] covers the reporting sink. Only the timeout, credential and
//!   sink-reported variants are safe to absorb, see [`SinkError::is_absorbable`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::marc::Record;

/// Remote file metadata, as produced by a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// File name, unique within one listing.
    pub name: String,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
    pub size: u64,
    pub mode: u32,
    pub owner_id: u32,
    pub group_id: u32,
}

impl FileDescriptor {
    /// Descriptor carrying only a name and a modification time.
    pub fn named(name: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            modified_at,
            size: 0,
            mode: 0,
            owner_id: 0,
            group_id: 0,
        }
    }
}

/// A fetched file: its descriptor plus the full payload held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub descriptor: FileDescriptor,
    pub content: Vec<u8>,
}

impl FetchedFile {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

/// Errors raised by a [`RemoteClient`] or [`Connector`].
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to connect to `{connection}`: {reason}")]
    Connect { connection: String, reason: String },

    #[error("`{connection}` rejected the supplied credentials: {reason}")]
    Auth { connection: String, reason: String },

    #[error("`{path}` does not exist")]
    NotFound { path: String },

    #[error("I/O error on `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// One session against a vendor server or the drop location.
///
/// Directory arguments are relative to the session root; an empty string
/// addresses the root itself.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Full metadata for every regular file in `dir`.
    async fn list_descriptors(&self, dir: &str) -> Result<Vec<FileDescriptor>, RemoteError>;

    /// Names only, for directories too large to describe wholesale.
    async fn list_names(&self, dir: &str) -> Result<Vec<String>, RemoteError>;

    /// Metadata for a single file.
    async fn describe_one(&self, dir: &str, name: &str) -> Result<FileDescriptor, RemoteError>;

    /// Fetch the payload of `descriptor` from `dir`.
    async fn fetch(
        &self,
        descriptor: &FileDescriptor,
        dir: &str,
    ) -> Result<FetchedFile, RemoteError>;

    /// Write `file` into `dir`, returning the descriptor of the written copy.
    async fn upload(&self, file: &FetchedFile, dir: &str) -> Result<FileDescriptor, RemoteError>;

    async fn exists(&self, dir: &str, name: &str) -> Result<bool, RemoteError>;

    async fn close(&self) -> Result<(), RemoteError>;
}

/// Opens [`RemoteClient`] sessions for named connections.
///
/// Credential sourcing is the implementor's business; the core only passes
/// the connection name found on a vendor profile.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, connection: &str) -> Result<Box<dyn RemoteClient>, RemoteError>;
}

/// Everything wrong with one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordErrors {
    pub missing_fields: Vec<String>,
    pub extra_fields: Vec<String>,
    pub invalid_fields: Vec<String>,
    pub order_item_mismatches: Vec<String>,
    /// Total reported by the validator itself, if it keeps one.
    pub error_count: Option<usize>,
}

impl RecordErrors {
    /// The validator's own total, else missing + extra + invalid.
    pub fn total(&self) -> usize {
        self.error_count.unwrap_or(
            self.missing_fields.len() + self.extra_fields.len() + self.invalid_fields.len(),
        )
    }
}

/// Result of checking one record. An invalid record is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid(RecordErrors),
}

/// Schema check for a single decoded record.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait RecordValidator: Send + Sync {
    fn check(&self, record: &Record) -> ValidationOutcome;
}

/// Acknowledgement returned by a sink after a successful append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendOutcome {
    pub spreadsheet_id: String,
    pub table_range: Option<String>,
    pub updated_rows: usize,
}

/// Errors raised by a [`ReportSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("report sink timed out: {0}")]
    Timeout(String),

    #[error("report sink rejected credentials: {0}")]
    Auth(String),

    #[error("report sink returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected report sink failure: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SinkError {
    /// Timeouts, credential failures and sink-reported errors can be absorbed
    /// by the publisher. Anything else must reach the caller.
    pub fn is_absorbable(&self) -> bool {
        !matches!(self, SinkError::Other(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SinkError::Timeout(_) => "timeout",
            SinkError::Auth(_) => "auth",
            SinkError::Rejected { .. } => "rejected",
            SinkError::Other(_) => "other",
        }
    }
}

/// The external reporting sink, e.g. a spreadsheet.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Append `rows` to `range`, one inner vector per row.
    async fn append(&self, range: &str, rows: Vec<Vec<String>>) -> Result<AppendOutcome, SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_total_prefers_validator_count() {
        let errors = RecordErrors {
            missing_fields: vec!["960".into()],
            extra_fields: vec!["949".into()],
            error_count: Some(7),
            ..Default::default()
        };
        assert_eq!(errors.total(), 7);
    }

    #[test]
    fn error_total_sums_field_lists() {
        let errors = RecordErrors {
            missing_fields: vec!["960".into(), "901".into()],
            invalid_fields: vec!["020".into()],
            order_item_mismatches: vec!["ignored in the sum".into()],
            ..Default::default()
        };
        assert_eq!(errors.total(), 3);
    }

    #[test]
    fn only_other_sink_errors_propagate() {
        assert!(SinkError::Timeout("slow".into()).is_absorbable());
        assert!(SinkError::Auth("expired".into()).is_absorbable());
        assert!(SinkError::Rejected {
            status: 429,
            message: "quota".into()
        }
        .is_absorbable());
        assert!(!SinkError::Other("boom".into()).is_absorbable());
    }
}
