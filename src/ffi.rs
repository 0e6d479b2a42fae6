//! Helpers to convert between Rust and C types.

#[cfg(not(windows))]
use std::os::unix::ffi::OsStrExt;
#[cfg(windows)]
use std::os::windows::ffi::OsStrExt;
use std::{
    any::Any,
    ffi::{CStr, CString, OsStr},
    os::raw::c_char,
    panic::{self, AssertUnwindSafe},
};

/// Character type of the OS path APIs.
#[cfg(windows)]
pub type COsChar = u16;
/// Character type of the OS path APIs.
#[cfg(not(windows))]
pub type COsChar = u8;

/// Conversion of OS strings into null-terminated buffers for the OS loader.
pub trait COsStr {
    /// Converts to a null-terminated buffer, replacing null characters with
    /// `␀`.
    fn to_c_vec(&self) -> Vec<COsChar>;
}

impl COsStr for OsStr {
    fn to_c_vec(&self) -> Vec<COsChar> {
        // ␀
        #[cfg(windows)]
        let null_string = OsStr::new("\u{2400}").encode_wide();
        #[cfg(not(windows))]
        let null_string = OsStr::new("\u{2400}").as_bytes().iter().copied();

        #[cfg(windows)]
        let string = self.encode_wide();
        #[cfg(not(windows))]
        let string = self.as_bytes().iter().copied();
        let mut clean_string = Vec::new();

        for char in string {
            if char == 0 {
                clean_string.extend(null_string.clone());
            } else {
                clean_string.push(char);
            }
        }

        clean_string.push(0);

        clean_string
    }
}

/// Conversion of Rust strings into [`CString`]s.
pub trait RToC {
    /// Converts to a [`CString`], replacing null characters with `␀`.
    fn into_cstring(self) -> CString;
}

impl RToC for String {
    fn into_cstring(self) -> CString {
        // replacing `\0` with `␀`, can't contain interior nulls afterwards
        CString::new(self.replace('\0', "\u{2400}")).unwrap_or_default()
    }
}

/// Reads a null-terminated string the library returned.
///
/// Yields [`None`] for a null pointer.
///
/// # Safety
/// `ptr` has to be null or point to a null-terminated string that stays
/// valid for the duration of this call.
pub unsafe fn borrow_c_str<'a>(ptr: *const c_char) -> Option<&'a CStr> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr))
    }
}

/// Runs `fun`, converting an unwinding panic into its message.
pub fn catch<R>(fun: impl FnOnce() -> R) -> Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(fun)).map_err(|payload| panic_message(&*payload))
}

/// Extracts the message of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

#[test]
fn c_vec() {
    let buffer = OsStr::new("lib\0x.so").to_c_vec();
    assert_eq!(Some(&0), buffer.last());
    assert_eq!(1, buffer.iter().filter(|char| **char == 0).count());
}

#[test]
fn cstring() {
    assert_eq!("a\u{2400}b", String::from("a\0b").into_cstring().to_str().unwrap());
}

#[test]
fn catch_panic() {
    assert_eq!(Ok(1), catch(|| 1));
    assert_eq!(Err(String::from("boom")), catch(|| -> i32 { panic!("boom") }));
    assert_eq!(
        Err(String::from("code 7")),
        catch(|| -> i32 { panic!("code {}", 7) })
    );
}
