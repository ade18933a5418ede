use thiserror::Error;
use tracing::{error, warn};

/// Domain-specific errors for shortcut discovery.
#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("event tap could not be created; input monitoring permission may be missing")]
    TapUnavailable,

    #[error("accessibility query failed: {0}")]
    Accessibility(String),
}

pub type Result<T> = std::result::Result<T, ScoutError>;

/// Extension trait for silent error logging with caller location tracking.
/// Use when the operation is recoverable and the catalog should keep going.
pub trait ResultExt<T> {
    /// Log error with caller location and return None. Use for recoverable failures.
    fn log_err(self) -> Option<T>;
    /// Log as warning with caller location and return None. Use for expected failures.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Debug> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                error!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation failed"
                );
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                warn!(
                    error = ?error,
                    file = caller.file(),
                    line = caller.line(),
                    "Operation had warning"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_err_passes_through_ok() {
        let ok: std::result::Result<u32, &str> = Ok(7);
        assert_eq!(ok.log_err(), Some(7));
    }

    #[test]
    fn log_err_swallows_err() {
        let err: std::result::Result<u32, &str> = Err("nope");
        assert_eq!(err.log_err(), None);
    }

    #[test]
    fn warn_on_err_swallows_err() {
        let err: std::result::Result<u32, &str> = Err("nope");
        assert_eq!(err.warn_on_err(), None);
    }
}
