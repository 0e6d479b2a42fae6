//! Invokes a resolved symbol and turns its outcome into a diagnostic.

use crate::{ffi, sys, Error, ErrorKind};
use std::os::raw::c_char;
use tracing::{error, info};

/// Placeholder for a null string returned by the library.
pub const UNKNOWN: &str = "unknown";

/// Outcome of [`invoke`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Invocation {
    /// Human-readable diagnostic.
    pub message: String,
    /// The decoded string or the classified failure.
    pub value: Result<String, Error>,
}

impl Invocation {
    /// Invocation that failed before anything could be called.
    #[must_use]
    pub fn failed(label: &str, error: Error) -> Self {
        let message = match error.kind() {
            ErrorKind::LibraryNotFound => format!("{} failed to load library: {}", label, error),
            _ => format!("{} failed with other error: {}", label, error),
        };
        error!(label, %error, "invocation failed");

        Self {
            message,
            value: Err(error),
        }
    }
}

/// Calls `fun`, which resolves and calls the probed symbol, and decodes the
/// returned string.
///
/// Errors returned by `fun` and unwinding panics are classified:
/// [`Error::LibraryNotFound`] is reported as such, everything else as other
/// error. Nothing propagates past this function.
///
/// # Safety
/// A non-null pointer returned by `fun` has to point to a null-terminated
/// string that is still mapped when `fun` returns.
pub unsafe fn invoke(
    label: &str,
    fun: impl FnOnce() -> Result<*const c_char, Error>,
) -> Invocation {
    let ptr = match ffi::catch(fun) {
        Ok(Ok(ptr)) => ptr,
        Ok(Err(error)) => return Invocation::failed(label, error),
        Err(panic) => return Invocation::failed(label, Error::InvocationFailed(panic)),
    };

    let value = match ffi::borrow_c_str(ptr) {
        None => Ok(String::from(UNKNOWN)),
        Some(string) => sys::decode_native(string),
    };

    match value {
        Ok(value) => {
            info!(label, %value, "invocation succeeded");

            Invocation {
                message: format!("{} succeeded, value: {}", label, value),
                value: Ok(value),
            }
        }
        Err(error) => Invocation::failed(label, error),
    }
}
