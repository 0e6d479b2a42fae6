#![warn(
    clippy::cargo,
    clippy::missing_docs_in_private_items,
    clippy::nursery,
    clippy::pedantic,
    missing_docs
)]

//! Fixture library exporting a version function, loaded by the probe
//! integration tests.

use std::{env, os::raw::c_char, path::PathBuf, ptr};

/// Version returned by [`dylib_probe_version`].
pub const VERSION: &str = "3.45.1-fixture";

/// Name of the exported version function.
pub const SYMBOL: &str = "dylib_probe_version";

/// Name of the exported function returning a null pointer.
pub const NULL_SYMBOL: &str = "dylib_probe_null";

/// Returns [`VERSION`] as a null-terminated string owned by the library.
#[allow(clippy::missing_const_for_fn)]
#[no_mangle]
pub extern "C" fn dylib_probe_version() -> *const c_char {
    b"3.45.1-fixture\0".as_ptr().cast()
}

/// Returns a null pointer.
#[allow(clippy::missing_const_for_fn)]
#[no_mangle]
pub extern "C" fn dylib_probe_null() -> *const c_char {
    ptr::null()
}

/// Helper function to determine the location of the dynamic library, next to
/// the test executable.
///
/// # Panics
/// Panics if the location of the current executable can't be determined.
#[must_use]
pub fn location() -> PathBuf {
    let mut path = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap();

    #[cfg(target_os = "linux")]
    {
        path = path.join("libdylib.so");
    }
    #[cfg(target_os = "macos")]
    {
        path = path.join("libdylib.dylib");
    }
    #[cfg(target_os = "windows")]
    {
        path = path.join("dylib.dll");
    }

    path
}
