//! Error types and result definitions for sync operations.
//!
//! Provides a classified error system for the replication pipeline. The
//! [`DbsyncError`] type supports single errors with captured diagnostic
//! metadata and aggregated errors for multi-table failure scenarios.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for sync operations using [`DbsyncError`] as the error type.
pub type DbsyncResult<T> = Result<T, DbsyncError>;

/// Detailed payload stored for single [`DbsyncError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for sync operations.
///
/// [`DbsyncError`] can represent a single classified error or multiple
/// aggregated errors (e.g. several tables failing within one pipeline run).
#[derive(Debug, Clone)]
pub struct DbsyncError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors, mainly from per-table pipeline failures.
    Many {
        errors: Vec<DbsyncError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur during sync operations.
///
/// The classification drives retry behavior: see [`DbsyncError::is_transient`].
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection Errors
    SourceConnectionFailed,
    TargetConnectionFailed,

    // Query & Execution Errors
    SourceQueryFailed,
    TargetQueryFailed,
    /// Lock-wait timeout or deadlock on the target; retry-eligible.
    TargetTransient,
    /// The underlying bulk extraction command failed.
    ExtractFailed,

    // Schema Errors
    SourceSchemaError,
    MissingSourceTable,
    MissingTargetTable,

    // Orchestration Errors
    /// An explicit table selection referenced an untracked table.
    UnknownTable,
    /// A verified row-count mismatch between source and target.
    ConsistencyCheckFailed,
    /// A load action observed registry state it requires to be present.
    MissingCheckpoint,
    InvalidState,
    WorkerPanic,

    // Configuration & IO Errors
    ConfigError,
    IoError,

    // Unknown / Uncategorized
    Unknown,
}

impl DbsyncError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or
    /// [`ErrorKind::Unknown`] when the list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Whether this error belongs to a retry-eligible class.
    ///
    /// Target lock contention and extraction command failures are the two
    /// systemic classes the orchestration loop retries; everything else is
    /// treated as fatal by the caller.
    pub fn is_transient(&self) -> bool {
        let kinds = self.kinds();
        !kinds.is_empty()
            && kinds
                .iter()
                .all(|kind| matches!(kind, ErrorKind::TargetTransient | ErrorKind::ExtractFailed))
    }

    /// Attaches an originating [`error::Error`] to this error and returns the
    /// modified instance.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        DbsyncError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl fmt::Display for DbsyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repr {
            ErrorRepr::Single(ref payload) => {
                write!(f, "{:?}: {}", payload.kind, payload.description)?;
                if let Some(detail) = &payload.detail {
                    write!(f, ": {detail}")?;
                }
                Ok(())
            }
            ErrorRepr::Many { ref errors, .. } => {
                write!(f, "{} errors occurred:", errors.len())?;
                for error in errors {
                    write!(f, "\n  - {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl error::Error for DbsyncError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for DbsyncError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> Self {
        DbsyncError::from_components(kind, Cow::Borrowed(description), None, None)
    }
}

impl From<(ErrorKind, String)> for DbsyncError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, String)) -> Self {
        DbsyncError::from_components(kind, Cow::Owned(description), None, None)
    }
}

impl From<(ErrorKind, &'static str, String)> for DbsyncError {
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, String)) -> Self {
        DbsyncError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            None,
        )
    }
}

impl From<Vec<DbsyncError>> for DbsyncError {
    #[track_caller]
    fn from(errors: Vec<DbsyncError>) -> Self {
        DbsyncError {
            repr: ErrorRepr::Many {
                errors,
                location: Location::caller(),
            },
        }
    }
}

impl From<std::io::Error> for DbsyncError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        DbsyncError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("An IO error occurred"),
            Some(Cow::Owned(err.to_string())),
            Some(Arc::new(err)),
        )
    }
}

/// SQLSTATE codes the target reports for retry-eligible lock contention.
const PG_DEADLOCK_DETECTED: &str = "40P01";
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";

impl From<sqlx::Error> for DbsyncError {
    #[track_caller]
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(PG_DEADLOCK_DETECTED) | Some(PG_LOCK_NOT_AVAILABLE) => {
                    ErrorKind::TargetTransient
                }
                _ => ErrorKind::TargetQueryFailed,
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ErrorKind::TargetConnectionFailed
            }
            _ => ErrorKind::TargetQueryFailed,
        };

        DbsyncError::from_components(
            kind,
            Cow::Borrowed("A database error occurred"),
            Some(Cow::Owned(err.to_string())),
            Some(Arc::new(err)),
        )
    }
}
