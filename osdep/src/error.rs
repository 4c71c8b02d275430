use std::io;

use thiserror::Error;

use crate::fault::Fault;

/// Errors reported by the services in this crate.
///
/// A symbol missing from a module is not an error; see [`Handle::function_sym`](crate::dso::Handle::function_sym).
#[derive(Debug, Error)]
pub enum Error {
    /// A module could not be found, or could not be initialized
    #[error("failed to load module `{path}`: {message}")]
    Load {
        /// The path, or name, the module was requested with
        path: String,
        /// The loader's description of the failure
        message: String,
    },
    /// Releasing a module failed
    #[error("failed to close module `{path}`: {message}")]
    Close {
        /// The path the module was opened with
        path: String,
        /// The loader's description of the failure
        message: String,
    },
    /// The operating system could not provide a thread, mutex, or condition variable
    #[error("{op} failed: {source}")]
    Resource {
        /// The native operation that failed
        op: &'static str,
        /// The operating system's error
        source: io::Error,
    },
    /// A foreign call faulted, and the fault was contained
    #[error("call into foreign code faulted: {0}")]
    FaultContained(Fault),
    /// A primitive was misused, such as relocking a held mutex or waiting twice on a single-waiter condition variable.
    ///
    /// The program state after this error is not well-defined.
    #[error("consistency violation in {op}: {message}")]
    ConsistencyViolation {
        /// The native operation that detected the misuse
        op: &'static str,
        /// A description of the misuse
        message: String,
    },
}

/// Result type used throughout [`osdep`](crate)
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Whether the caller can carry on after this error.
    ///
    /// Everything but [`Error::ConsistencyViolation`] is recoverable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ConsistencyViolation { .. })
    }

    /// Maps an error number returned by a pthread function onto the taxonomy
    #[cfg(unix)]
    pub(crate) fn from_errno(op: &'static str, code: i32) -> Self {
        match code {
            libc::EDEADLK | libc::EPERM | libc::EINVAL | libc::EBUSY => Self::ConsistencyViolation {
                op,
                message: io::Error::from_raw_os_error(code).to_string(),
            },
            _ => Self::Resource {
                op,
                source: io::Error::from_raw_os_error(code),
            },
        }
    }

    /// A [`Error::Resource`] from the calling thread's last OS error
    #[cfg(windows)]
    pub(crate) fn last_os_error(op: &'static str) -> Self {
        Self::Resource {
            op,
            source: io::Error::last_os_error(),
        }
    }

    /// Emits the error at `error` level, then returns it
    pub(crate) fn logged(self) -> Self {
        match &self {
            Self::ConsistencyViolation { op, message } => {
                tracing::error!(op, %message, "consistency violation");
            }
            Self::FaultContained(fault) => {
                tracing::warn!(%fault, "foreign call faulted");
            }
            err => tracing::error!("{err}"),
        }
        self
    }
}
