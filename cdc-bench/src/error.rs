use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use cdc_harness::error::HarnessError;

/// Exit code of runs that could not reach a required collaborator.
pub const EXIT_UNREACHABLE: u8 = 2;

/// Exit code of configuration and other fatal errors.
pub const EXIT_FATAL: u8 = 1;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type of the benchmark binary.
pub type BenchResult<T> = Result<T, BenchError>;

/// Captured backtrace wrapper to avoid thiserror's unstable feature detection.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type of the benchmark binary.
///
/// Wraps [`HarnessError`] for measurement errors and separates collaborators that never became
/// ready, which map to their own exit code.
#[derive(Debug)]
pub enum BenchError {
    /// Error raised by the harness library.
    Harness(HarnessError),
    /// One or more collaborators did not pass the readiness gate.
    Unreachable(HarnessError),
    /// Configuration or startup error.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O error, e.g. while writing a report.
    Io(std::io::Error, CapturedBacktrace),
}

impl BenchError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            BenchError::Harness(err) if err.is_connectivity() => "connectivity error",
            BenchError::Harness(_) => "harness error",
            BenchError::Unreachable(_) => "readiness error",
            BenchError::Config(_, _) => "configuration error",
            BenchError::Io(_, _) => "i/o error",
        }
    }

    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            BenchError::Unreachable(_) => EXIT_UNREACHABLE,
            BenchError::Harness(err) if err.is_connectivity() => EXIT_UNREACHABLE,
            _ => EXIT_FATAL,
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            BenchError::Harness(err) | BenchError::Unreachable(err) => err.backtrace(),
            BenchError::Config(_, cb) => Some(&cb.0),
            BenchError::Io(_, cb) => Some(&cb.0),
        }
    }

    /// Creates a configuration error from any source.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        BenchError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("cdc-bench failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        let aggregated = matches!(
            self,
            BenchError::Harness(err) | BenchError::Unreachable(err) if err.errors().is_some()
        );
        if !aggregated {
            let mut source = Error::source(self);
            let mut idx = 1usize;
            while let Some(err) = source {
                out.push_str(&format!("cause {idx}: {err}\n"));
                source = err.source();
                idx += 1;
            }
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchError::Harness(err) => write!(f, "{err}"),
            BenchError::Unreachable(err) => write!(f, "collaborators unreachable: {err}"),
            BenchError::Config(source, _) => write!(f, "configuration error: {source}"),
            BenchError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for BenchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BenchError::Harness(err) | BenchError::Unreachable(err) => err.source(),
            BenchError::Config(source, _) => Some(source.as_ref()),
            BenchError::Io(source, _) => Some(source),
        }
    }
}

impl From<HarnessError> for BenchError {
    fn from(err: HarnessError) -> Self {
        BenchError::Harness(err)
    }
}

impl From<std::io::Error> for BenchError {
    fn from(err: std::io::Error) -> Self {
        BenchError::Io(err, CapturedBacktrace::capture())
    }
}

#[cfg(test)]
mod tests {
    use cdc_harness::error::ErrorKind;
    use cdc_harness::harness_error;

    use super::*;

    #[test]
    fn unreachable_collaborators_exit_with_two() {
        let err = BenchError::Unreachable(harness_error!(
            ErrorKind::SourceConnectionFailed,
            "Source connection failed"
        ));
        assert_eq!(err.exit_code(), EXIT_UNREACHABLE);
        assert_eq!(err.category(), "readiness error");
    }

    #[test]
    fn connectivity_errors_during_a_run_exit_with_two() {
        let err: BenchError =
            harness_error!(ErrorKind::TargetConnectionFailed, "Target connection failed").into();
        assert_eq!(err.exit_code(), EXIT_UNREACHABLE);
        assert_eq!(err.category(), "connectivity error");
    }

    #[test]
    fn schema_failures_are_fatal() {
        let err: BenchError = harness_error!(
            ErrorKind::SchemaApplyFailed,
            "Schema statement failed",
            "CREATE TABLE orders failed"
        )
        .into();
        assert_eq!(err.exit_code(), EXIT_FATAL);

        let report = err.render_report();
        assert!(report.starts_with("cdc-bench failed\n"));
        assert!(report.contains("category: harness error"));
        assert!(report.contains("Schema statement failed"));
    }

    #[test]
    fn io_errors_list_no_causes_of_their_own() {
        let err: BenchError = std::io::Error::other("broken pipe").into();
        assert_eq!(err.exit_code(), EXIT_FATAL);
        assert!(err.render_report().contains("error: i/o error: broken pipe"));
    }
}
