use std::fmt;

use crate::ingest::IngestState;

/// Errors raised by the segment state machines on either tier.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentError {
    SegmentNotFound {
        segment_id: String,
    },
    AlreadyClaimed {
        segment_id: String,
    },
    LeaseNotFound {
        lease_id: String,
    },
    LeaseExpired {
        lease_id: String,
        segment_id: String,
    },
    InvalidTransition {
        segment_id: String,
        from: IngestState,
        to: IngestState,
    },
    InvalidSegment {
        segment_id: String,
        reason: String,
    },
    Storage(StorageError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    ReadFailed {
        context: String,
        source: Box<StorageErrorSource>,
    },
    WriteFailed {
        context: String,
        source: Box<StorageErrorSource>,
    },
    NotFound {
        context: String,
    },
    InsufficientSpace {
        context: String,
    },
    PermissionDenied {
        context: String,
    },
    DataCorruption {
        context: String,
        details: String,
    },
}

/// Errors loading or validating node configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Read { path: String, reason: String },
    Parse { path: String, reason: String },
    Invalid { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageErrorSource {
    Io(String),
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::SegmentNotFound { segment_id } => {
                write!(f, "Segment '{segment_id}' not found")
            }
            SegmentError::AlreadyClaimed { segment_id } => {
                write!(f, "Segment '{segment_id}' is already claimed")
            }
            SegmentError::LeaseNotFound { lease_id } => {
                write!(f, "Lease '{lease_id}' not found")
            }
            SegmentError::LeaseExpired {
                lease_id,
                segment_id,
            } => {
                write!(f, "Lease '{lease_id}' on segment '{segment_id}' has expired")
            }
            SegmentError::InvalidTransition {
                segment_id,
                from,
                to,
            } => {
                write!(
                    f,
                    "Segment '{segment_id}' cannot move from {from} to {to}"
                )
            }
            SegmentError::InvalidSegment { segment_id, reason } => {
                write!(f, "Invalid segment '{segment_id}': {reason}")
            }
            SegmentError::Storage(err) => write!(f, "Storage error: {err}"),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ReadFailed { context, source } => {
                write!(f, "Read failed in {context}: {source}")
            }
            StorageError::WriteFailed { context, source } => {
                write!(f, "Write failed in {context}: {source}")
            }
            StorageError::NotFound { context } => write!(f, "Not found in {context}"),
            StorageError::InsufficientSpace { context } => {
                write!(f, "Insufficient space in {context}")
            }
            StorageError::PermissionDenied { context } => {
                write!(f, "Permission denied in {context}")
            }
            StorageError::DataCorruption { context, details } => {
                write!(f, "Data corruption in {context}: {details}")
            }
        }
    }
}

impl fmt::Display for StorageErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorSource::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, reason } => {
                write!(f, "Failed to read config file {path}: {reason}")
            }
            ConfigError::Parse { path, reason } => {
                write!(f, "Failed to parse config file {path}: {reason}")
            }
            ConfigError::Invalid { field, reason } => {
                write!(f, "Invalid configuration for '{field}': {reason}")
            }
        }
    }
}

impl ConfigError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for SegmentError {}
impl std::error::Error for StorageError {}
impl std::error::Error for StorageErrorSource {}

impl SegmentError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SegmentError::SegmentNotFound { .. } | SegmentError::LeaseNotFound { .. }
        )
    }

    /// Lease conflicts are expected under concurrent consumers and are resolved
    /// by the caller abandoning the attempt.
    pub fn is_lease_conflict(&self) -> bool {
        matches!(
            self,
            SegmentError::AlreadyClaimed { .. } | SegmentError::LeaseExpired { .. }
        )
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SegmentError::SegmentNotFound { .. }
                | SegmentError::AlreadyClaimed { .. }
                | SegmentError::LeaseNotFound { .. }
                | SegmentError::LeaseExpired { .. }
                | SegmentError::InvalidTransition { .. }
                | SegmentError::InvalidSegment { .. }
        )
    }

    pub fn invalid_segment(segment_id: impl fmt::Display, reason: impl Into<String>) -> Self {
        SegmentError::InvalidSegment {
            segment_id: segment_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<StorageError> for SegmentError {
    fn from(err: StorageError) -> Self {
        SegmentError::Storage(err)
    }
}

impl StorageError {
    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound {
                context: context.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                context: context.to_string(),
            },
            std::io::ErrorKind::StorageFull | std::io::ErrorKind::OutOfMemory => {
                StorageError::InsufficientSpace {
                    context: context.to_string(),
                }
            }
            _ => StorageError::WriteFailed {
                context: context.to_string(),
                source: Box::new(StorageErrorSource::Io(e.to_string())),
            },
        }
    }

    pub fn from_read_error(e: std::io::Error, context: &str) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound {
                context: context.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied {
                context: context.to_string(),
            },
            _ => StorageError::ReadFailed {
                context: context.to_string(),
                source: Box::new(StorageErrorSource::Io(e.to_string())),
            },
        }
    }

    /// A file on disk that no longer parses as a segment.
    pub fn corruption(context: impl Into<String>, details: impl Into<String>) -> Self {
        StorageError::DataCorruption {
            context: context.into(),
            details: details.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}
