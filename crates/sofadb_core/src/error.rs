//! Error types for SofaDB core.
//!
//! Every [`CoreError`] maps to exactly one stable [`ErrorCode`]. The codes are
//! what an embedding layer hands across its boundary; the error values carry
//! the detail for logs.

use sofadb_storage::StorageError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SofaDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error raised while reading.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Storage backend error raised while appending or syncing.
    #[error("write failed: {source}")]
    Write {
        /// The underlying storage error.
        source: StorageError,
    },

    /// I/O error outside the storage backend (rename, directory sync, cleanup).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The database file could not be opened.
    #[error("cannot open {}: {source}", path.display())]
    OpenFailed {
        /// Path that failed to open.
        path: PathBuf,
        /// The underlying storage error.
        source: StorageError,
    },

    /// The database file does not exist and creation was not requested.
    #[error("no such file: {}", path.display())]
    NoSuchFile {
        /// Path that was not found.
        path: PathBuf,
    },

    /// Another handle holds the writer lock on the file.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// A block or index structure is malformed.
    #[error("corrupt database: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// No valid header was found in the file.
    #[error("no valid header found")]
    NoHeader,

    /// The last valid header was written by an unsupported format version.
    #[error("unsupported disk version {found} (supported: {supported})")]
    HeaderVersionMismatch {
        /// Version found on disk.
        found: u8,
        /// Version this build reads and writes.
        supported: u8,
    },

    /// The document does not exist or has been deleted.
    #[error("document not found: {:?}", String::from_utf8_lossy(.id))]
    DocNotFound {
        /// The requested document ID.
        id: Vec<u8>,
    },

    /// A caller-supplied argument was rejected.
    #[error("invalid arguments: {message}")]
    InvalidArguments {
        /// Description of the problem.
        message: String,
    },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// An encoded reduction exceeded the per-pointer limit.
    #[error("reduction too large: {size} bytes (max {max})")]
    ReductionTooLarge {
        /// Encoded size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A reducer could not interpret its input.
    #[error("reducer failure: {message}")]
    ReducerFailure {
        /// Description of the failure.
        message: String,
    },

    /// The handle has been closed.
    #[error("database is closed")]
    FileClosed,

    /// The file no longer matches the state this handle was opened against.
    #[error("database no longer valid: {message}")]
    DatabaseInvalid {
        /// Description of what changed.
        message: String,
    },

    /// A block could not be allocated.
    #[error("allocation failed: {message}")]
    AllocFailed {
        /// Description of the failure.
        message: String,
    },

    /// A mutation was attempted on a read-only handle.
    #[error("database is read-only")]
    ReadOnly,
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates an invalid-arguments error.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    /// Creates a reducer failure.
    pub fn reducer_failure(message: impl Into<String>) -> Self {
        Self::ReducerFailure {
            message: message.into(),
        }
    }

    /// Creates a "database no longer valid" error.
    pub fn database_invalid(message: impl Into<String>) -> Self {
        Self::DatabaseInvalid {
            message: message.into(),
        }
    }

    /// Creates an allocation failure.
    pub fn alloc_failed(message: impl Into<String>) -> Self {
        Self::AllocFailed {
            message: message.into(),
        }
    }

    /// Creates a not-found error for `id`.
    pub fn doc_not_found(id: &[u8]) -> Self {
        Self::DocNotFound { id: id.to_vec() }
    }

    /// Wraps a storage error raised on the write path.
    pub fn write(source: StorageError) -> Self {
        match source {
            StorageError::ReadOnly => Self::ReadOnly,
            source => Self::Write { source },
        }
    }

    /// Returns the stable code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Storage(e) => match e {
                StorageError::Io(_) | StorageError::ReadPastEnd { .. } => ErrorCode::Read,
                StorageError::Corrupted(_) => ErrorCode::Corrupt,
                StorageError::Closed => ErrorCode::FileClosed,
                StorageError::ReadOnly => ErrorCode::Write,
            },
            Self::Write { .. } | Self::Io(_) | Self::ReadOnly => ErrorCode::Write,
            Self::OpenFailed { .. } | Self::DatabaseLocked => ErrorCode::OpenFile,
            Self::NoSuchFile { .. } => ErrorCode::NoSuchFile,
            Self::Corrupt { .. } => ErrorCode::Corrupt,
            Self::ChecksumMismatch { .. } => ErrorCode::ChecksumFail,
            Self::NoHeader => ErrorCode::NoHeader,
            Self::HeaderVersionMismatch { .. } => ErrorCode::HeaderVersion,
            Self::DocNotFound { .. } => ErrorCode::DocNotFound,
            Self::InvalidArguments { .. } => ErrorCode::InvalidArguments,
            Self::Cancelled => ErrorCode::Cancel,
            Self::ReductionTooLarge { .. } => ErrorCode::ReductionTooLarge,
            Self::ReducerFailure { .. } => ErrorCode::ReducerFailure,
            Self::FileClosed => ErrorCode::FileClosed,
            Self::DatabaseInvalid { .. } => ErrorCode::DbNoLongerValid,
            Self::AllocFailed { .. } => ErrorCode::AllocFail,
        }
    }
}

/// Stable error codes exposed at the database boundary.
///
/// The numeric values are part of the public contract and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// The file could not be opened or locked.
    OpenFile = -1,
    /// A structure in the file is malformed.
    Corrupt = -2,
    /// A block could not be allocated.
    AllocFail = -3,
    /// Reading from the file failed.
    Read = -4,
    /// The document is absent or deleted.
    DocNotFound = -5,
    /// The file has no valid header.
    NoHeader = -6,
    /// Writing to the file failed.
    Write = -7,
    /// The header uses an unsupported format version.
    HeaderVersion = -8,
    /// A block checksum did not match.
    ChecksumFail = -9,
    /// Caller arguments were rejected.
    InvalidArguments = -10,
    /// The file does not exist.
    NoSuchFile = -11,
    /// The operation was cancelled.
    Cancel = -12,
    /// A reduction exceeded its size limit.
    ReductionTooLarge = -13,
    /// A reducer failed.
    ReducerFailure = -14,
    /// The handle is closed.
    FileClosed = -15,
    /// The handle's view of the file is no longer valid.
    DbNoLongerValid = -16,
}

/// Broad classes of [`ErrorCode`]s, used to decide how a caller should react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing files, failed opens and failed allocations.
    Resource,
    /// Checksum, structure and version problems. Never repaired automatically.
    Corruption,
    /// Expected control flow such as a missing document.
    Logical,
    /// Use of a closed or invalidated handle.
    State,
}

impl ErrorCode {
    /// All codes in numeric order, from -1 downward.
    pub const ALL: [ErrorCode; 16] = [
        Self::OpenFile,
        Self::Corrupt,
        Self::AllocFail,
        Self::Read,
        Self::DocNotFound,
        Self::NoHeader,
        Self::Write,
        Self::HeaderVersion,
        Self::ChecksumFail,
        Self::InvalidArguments,
        Self::NoSuchFile,
        Self::Cancel,
        Self::ReductionTooLarge,
        Self::ReducerFailure,
        Self::FileClosed,
        Self::DbNoLongerValid,
    ];

    /// Returns the numeric value of this code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Looks up a code by its numeric value.
    #[must_use]
    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_i32() == value)
    }

    /// Returns the stable snake-case name of this code.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OpenFile => "open_file",
            Self::Corrupt => "corrupt",
            Self::AllocFail => "alloc_fail",
            Self::Read => "read",
            Self::DocNotFound => "doc_not_found",
            Self::NoHeader => "no_header",
            Self::Write => "write",
            Self::HeaderVersion => "header_version",
            Self::ChecksumFail => "checksum_fail",
            Self::InvalidArguments => "invalid_arguments",
            Self::NoSuchFile => "no_such_file",
            Self::Cancel => "cancel",
            Self::ReductionTooLarge => "reduction_too_large",
            Self::ReducerFailure => "reducer_failure",
            Self::FileClosed => "file_closed",
            Self::DbNoLongerValid => "db_no_longer_valid",
        }
    }

    /// Returns the category this code belongs to.
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::OpenFile
            | Self::AllocFail
            | Self::Read
            | Self::Write
            | Self::NoSuchFile
            | Self::Cancel => ErrorCategory::Resource,
            Self::Corrupt
            | Self::NoHeader
            | Self::HeaderVersion
            | Self::ChecksumFail
            | Self::ReductionTooLarge
            | Self::ReducerFailure => ErrorCategory::Corruption,
            Self::DocNotFound | Self::InvalidArguments => ErrorCategory::Logical,
            Self::FileClosed | Self::DbNoLongerValid => ErrorCategory::State,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}
