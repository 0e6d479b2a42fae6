//! Raw bindings to the OS loader.
//!
//! Unix goes through `dlopen`, `dlsym`, `dlclose` and `dlerror` from [`libc`],
//! Windows through `kernel32`.

use crate::ffi::COsStr;
use std::{
    ffi::{CStr, OsStr},
    os::raw::c_void,
    ptr::NonNull,
};

/// A failed OS loader call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Failure {
    /// OS error code, if the OS reported one.
    pub code: Option<i32>,
    /// Reason reported by the OS.
    pub message: String,
}

/// Raw handle of a mapped library image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RawHandle(NonNull<c_void>);

#[cfg(unix)]
mod imp {
    use super::Failure;
    use crate::ffi::borrow_c_str;

    /// Takes the pending `dlerror` message.
    pub fn failure(fallback: &str) -> Failure {
        let message = unsafe { borrow_c_str(libc::dlerror()) }.map_or_else(
            || fallback.to_owned(),
            |message| message.to_string_lossy().into_owned(),
        );

        Failure {
            code: None,
            message,
        }
    }

    /// Clears a stale `dlerror` message.
    pub fn clear() {
        unsafe { libc::dlerror() };
    }
}

#[cfg(windows)]
mod imp {
    #![allow(non_snake_case, clippy::missing_docs_in_private_items)]

    use super::Failure;
    use std::{
        io,
        os::raw::{c_char, c_void},
    };

    pub const CP_ACP: u32 = 0;

    #[link(name = "kernel32")]
    extern "system" {
        pub fn LoadLibraryW(name: *const u16) -> *mut c_void;
        pub fn GetProcAddress(module: *mut c_void, name: *const c_char) -> *mut c_void;
        pub fn FreeLibrary(module: *mut c_void) -> i32;
        pub fn GetModuleHandleW(name: *const u16) -> *mut c_void;
        pub fn SetDllDirectoryW(path: *const u16) -> i32;
        pub fn GetDllDirectoryW(length: u32, buffer: *mut u16) -> u32;
        pub fn SetLastError(code: u32);
        pub fn MultiByteToWideChar(
            code_page: u32,
            flags: u32,
            string: *const c_char,
            length: i32,
            wide: *mut u16,
            wide_length: i32,
        ) -> i32;
    }

    /// Takes `GetLastError`.
    pub fn failure(_fallback: &str) -> Failure {
        let error = io::Error::last_os_error();

        Failure {
            code: error.raw_os_error(),
            message: error.to_string(),
        }
    }

    pub fn clear() {
        unsafe { SetLastError(0) }
    }
}

/// `GetLastError` of the last failed call.
#[cfg(windows)]
fn last_error_code() -> Option<i32> {
    std::io::Error::last_os_error().raw_os_error()
}

/// Maps `target` into the process.
///
/// Names without a directory component go through the OS default search.
pub fn open(target: &OsStr) -> Result<RawHandle, Failure> {
    let target = target.to_c_vec();
    imp::clear();

    #[cfg(unix)]
    let handle = unsafe {
        libc::dlopen(
            target.as_ptr().cast(),
            libc::RTLD_NOW | libc::RTLD_LOCAL,
        )
    };
    #[cfg(windows)]
    let handle = unsafe { imp::LoadLibraryW(target.as_ptr()) };

    NonNull::new(handle)
        .map(RawHandle)
        .ok_or_else(|| imp::failure("failed to open library"))
}

/// Looks up `symbol` in `handle`.
///
/// # Safety
/// `handle` must not have been passed to [`close`] yet.
pub unsafe fn symbol(handle: RawHandle, symbol: &CStr) -> Result<NonNull<c_void>, Failure> {
    imp::clear();

    #[cfg(unix)]
    let address = libc::dlsym(handle.0.as_ptr(), symbol.as_ptr());
    #[cfg(windows)]
    let address = imp::GetProcAddress(handle.0.as_ptr(), symbol.as_ptr());

    NonNull::new(address).ok_or_else(|| imp::failure("symbol not exported"))
}

/// Looks up `symbol` in the images the process was linked against.
pub fn process_symbol(symbol: &CStr) -> Result<NonNull<c_void>, Failure> {
    imp::clear();

    #[cfg(unix)]
    let address = unsafe { libc::dlsym(libc::RTLD_DEFAULT, symbol.as_ptr()) };
    #[cfg(windows)]
    let address = unsafe {
        let module = imp::GetModuleHandleW(std::ptr::null());

        if module.is_null() {
            return Err(imp::failure("no process module"));
        }

        imp::GetProcAddress(module, symbol.as_ptr())
    };

    NonNull::new(address).ok_or_else(|| imp::failure("symbol not linked into the process"))
}

/// Unmaps `handle`.
///
/// # Safety
/// No symbol of `handle` may be used afterwards.
pub unsafe fn close(handle: RawHandle) -> Result<(), Failure> {
    imp::clear();

    #[cfg(unix)]
    let closed = libc::dlclose(handle.0.as_ptr()) == 0;
    #[cfg(windows)]
    let closed = imp::FreeLibrary(handle.0.as_ptr()) != 0;

    if closed {
        Ok(())
    } else {
        Err(imp::failure("failed to close library"))
    }
}

/// Decodes a string returned by the library with the platform's native
/// encoding, the ANSI code page on Windows and UTF-8 elsewhere.
pub fn decode_native(string: &CStr) -> Result<String, crate::Error> {
    #[cfg(windows)]
    {
        if string.to_bytes().is_empty() {
            return Ok(String::new());
        }

        let length = unsafe {
            imp::MultiByteToWideChar(
                imp::CP_ACP,
                0,
                string.as_ptr(),
                -1,
                std::ptr::null_mut(),
                0,
            )
        };

        if length <= 0 {
            return Err(crate::Error::DecodeFailed(imp::failure("").message));
        }

        #[allow(clippy::cast_sign_loss)]
        let mut wide = vec![0_u16; length as usize];
        let written = unsafe {
            imp::MultiByteToWideChar(
                imp::CP_ACP,
                0,
                string.as_ptr(),
                -1,
                wide.as_mut_ptr(),
                length,
            )
        };

        if written <= 0 {
            return Err(crate::Error::DecodeFailed(imp::failure("").message));
        }

        // drop the terminating null
        wide.truncate(wide.len() - 1);
        String::from_utf16(&wide).map_err(|error| crate::Error::DecodeFailed(error.to_string()))
    }
    #[cfg(not(windows))]
    {
        Ok(string.to_str()?.to_owned())
    }
}

/// Gets the directory set with `SetDllDirectoryW`.
#[cfg(windows)]
pub fn dll_directory() -> Result<Option<std::path::PathBuf>, Failure> {
    use std::{ffi::OsString, os::windows::ffi::OsStringExt};

    /// Zero characters mean no directory is set, unless the OS reports an
    /// error.
    fn empty() -> Result<Option<std::path::PathBuf>, Failure> {
        match last_error_code() {
            None | Some(0) => Ok(None),
            Some(_) => Err(imp::failure("")),
        }
    }

    imp::clear();
    let length = unsafe { imp::GetDllDirectoryW(0, std::ptr::null_mut()) };

    if length == 0 {
        return empty();
    }

    let mut buffer = vec![0_u16; length as usize];
    imp::clear();
    let written = unsafe { imp::GetDllDirectoryW(length, buffer.as_mut_ptr()) };

    // the size query reports room for the terminating null even when empty
    if written == 0 {
        return empty();
    }

    if written >= length {
        return Err(imp::failure(""));
    }

    buffer.truncate(written as usize);
    Ok(Some(OsString::from_wide(&buffer).into()))
}

/// Sets the directory searched by `LoadLibraryW`, [`None`] restores the
/// default search order.
#[cfg(windows)]
pub fn set_dll_directory(directory: Option<&std::path::Path>) -> Result<(), Failure> {
    let directory = directory.map(|directory| directory.as_os_str().to_c_vec());
    let ptr = directory
        .as_ref()
        .map_or_else(std::ptr::null, |directory| directory.as_ptr());

    if unsafe { imp::SetDllDirectoryW(ptr) } == 0 {
        Err(imp::failure(""))
    } else {
        Ok(())
    }
}

#[test]
fn open_missing() {
    let failure = open(OsStr::new("this-library-does-not-exist-anywhere.so")).unwrap_err();
    assert!(!failure.message.is_empty());
}

#[test]
fn decode() {
    let string = CStr::from_bytes_with_nul(b"3.45.1\0").unwrap();
    assert_eq!("3.45.1", decode_native(string).unwrap());
}

#[cfg(unix)]
#[test]
fn decode_invalid() {
    let string = CStr::from_bytes_with_nul(b"\xff\xfe\0").unwrap();
    assert_eq!(
        crate::ErrorKind::DecodeFailed,
        decode_native(string).unwrap_err().kind()
    );
}
