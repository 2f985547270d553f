//! Error types and result definitions for harness operations.
//!
//! [`HarnessError`] carries a classification ([`ErrorKind`]), a static description, optional
//! dynamic detail, an optional source error and the call site that created it. Several errors
//! can be aggregated into one, which is how failures of concurrent workers are reported.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Payload stored for single [`HarnessError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the harness.
#[derive(Debug, Clone)]
pub struct HarnessError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Multiple aggregated errors, typically one per failed worker.
    Many {
        errors: Vec<HarnessError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors raised by the harness.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connectivity
    SourceConnectionFailed,
    TargetConnectionFailed,
    PipelineUnreachable,

    // Query execution
    SourceQueryFailed,
    TargetQueryFailed,
    SchemaApplyFailed,

    // Preconditions
    NoParentAvailable,
    DeletePreconditionFailed,

    // Reconciliation
    PartialCleanup,

    // Capabilities & data
    UnsupportedOperation,
    InvalidData,
    InvalidState,
    ConfigError,

    // IO & serialization
    IoError,
    SerializationError,

    // Workers
    WorkerPanic,

    Unknown,
}

impl ErrorKind {
    /// Returns `true` for kinds meaning a collaborator could not be reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ErrorKind::SourceConnectionFailed
                | ErrorKind::TargetConnectionFailed
                | ErrorKind::PipelineUnreachable
        )
    }
}

impl HarnessError {
    /// Returns the [`ErrorKind`] of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "Multiple errors",
        }
    }

    /// Returns the dynamic detail, for aggregates the first one available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the aggregated errors, if this is an aggregate.
    pub fn errors(&self) -> Option<&[HarnessError]> {
        match self.repr {
            ErrorRepr::Single(_) => None,
            ErrorRepr::Many { ref errors, .. } => Some(errors),
        }
    }

    /// Returns the captured backtrace for single errors.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the call site that created this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Returns `true` if this error means a collaborator could not be reached.
    pub fn is_connectivity(&self) -> bool {
        self.kind().is_connectivity()
    }

    /// Attaches an originating error, exposed through [`error::Error::source`].
    ///
    /// Has no effect on aggregates, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Converts a driver error raised while talking to the target.
    #[track_caller]
    pub fn from_target(err: sqlx::Error) -> HarnessError {
        let kind = if is_connection_error(&err) {
            ErrorKind::TargetConnectionFailed
        } else {
            ErrorKind::TargetQueryFailed
        };

        let detail = err.to_string();
        HarnessError::from_components(
            kind,
            Cow::Borrowed("Target query failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        HarnessError {
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

impl PartialEq for HarnessError {
    fn eq(&self, other: &HarnessError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_indented(f, "Detail:", detail)?;
                }
                if payload.backtrace.status() == BacktraceStatus::Captured {
                    write_indented(f, "Backtrace:", &payload.backtrace.to_string())?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

fn write_indented(f: &mut fmt::Formatter<'_>, header: &str, body: &str) -> fmt::Result {
    if body.trim().is_empty() {
        return write!(f, "\n  {header} <empty>");
    }

    write!(f, "\n  {header}")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates a [`HarnessError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for HarnessError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> HarnessError {
        HarnessError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`HarnessError`] from an error kind, static description and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for HarnessError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> HarnessError {
        HarnessError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors; a single error is returned as is.
impl<E> From<Vec<E>> for HarnessError
where
    E: Into<HarnessError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> HarnessError {
        let location = Location::caller();
        let mut errors: Vec<HarnessError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        HarnessError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts a driver error raised while talking to the source.
///
/// Use [`HarnessError::from_target`] for errors of the target.
impl From<sqlx::Error> for HarnessError {
    #[track_caller]
    fn from(err: sqlx::Error) -> HarnessError {
        let kind = if is_connection_error(&err) {
            ErrorKind::SourceConnectionFailed
        } else {
            ErrorKind::SourceQueryFailed
        };

        let detail = err.to_string();
        HarnessError::from_components(
            kind,
            Cow::Borrowed("Source query failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<std::io::Error> for HarnessError {
    #[track_caller]
    fn from(err: std::io::Error) -> HarnessError {
        let detail = err.to_string();
        HarnessError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<serde_json::Error> for HarnessError {
    #[track_caller]
    fn from(err: serde_json::Error) -> HarnessError {
        let detail = err.to_string();
        HarnessError::from_components(
            ErrorKind::SerializationError,
            Cow::Borrowed("JSON serialization failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<reqwest::Error> for HarnessError {
    #[track_caller]
    fn from(err: reqwest::Error) -> HarnessError {
        let detail = err.to_string();
        HarnessError::from_components(
            ErrorKind::PipelineUnreachable,
            Cow::Borrowed("Pipeline health request failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Returns `true` for driver errors that mean the endpoint could not be reached.
fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness_error;

    #[test]
    fn single_error_renders_kind_and_detail() {
        let err = harness_error!(
            ErrorKind::NoParentAvailable,
            "No confirmed parent key",
            "table customers"
        );
        let rendered = err.to_string();

        assert!(rendered.starts_with("[NoParentAvailable] No confirmed parent key @ "));
        assert!(rendered.contains("Detail:\n    table customers"));
        assert_eq!(err.kind(), ErrorKind::NoParentAvailable);
        assert_eq!(err.detail(), Some("table customers"));
    }

    #[test]
    fn single_element_vector_is_unwrapped() {
        let err: HarnessError = vec![harness_error!(ErrorKind::InvalidState, "one")].into();
        assert!(err.errors().is_none());
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn aggregate_lists_every_error() {
        let err: HarnessError = vec![
            harness_error!(ErrorKind::SourceQueryFailed, "first"),
            harness_error!(ErrorKind::WorkerPanic, "second"),
        ]
        .into();

        assert_eq!(
            err.kinds(),
            vec![ErrorKind::SourceQueryFailed, ErrorKind::WorkerPanic]
        );
        let rendered = err.to_string();
        assert!(rendered.starts_with("[Many] 2 errors aggregated"));
        assert!(rendered.contains("1. [SourceQueryFailed] first"));
        assert!(rendered.contains("2. [WorkerPanic] second"));
    }

    #[test]
    fn driver_errors_are_classified_by_side() {
        let source: HarnessError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(source.kind(), ErrorKind::SourceConnectionFailed);
        assert!(source.is_connectivity());

        let target = HarnessError::from_target(sqlx::Error::RowNotFound);
        assert_eq!(target.kind(), ErrorKind::TargetQueryFailed);
        assert!(!target.is_connectivity());
    }
}
