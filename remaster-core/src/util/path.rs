use std::path::{Path, PathBuf};

/// Path form the external engine can open. AviSynth reads script and plugin
/// paths through the ANSI code page on Windows, so non-ASCII paths are
/// replaced with their 8.3 short form there. Other platforms accept UTF-8
/// paths as-is.
#[inline]
pub fn ascii_safe_path(path: &Path) -> PathBuf {
    if path.as_os_str().is_ascii() {
        return path.to_path_buf();
    }

    platform::short_path(path).unwrap_or_else(|| path.to_path_buf())
}

#[cfg(target_os = "windows")]
mod platform {
    use std::{
        ffi::OsString,
        os::windows::ffi::{OsStrExt, OsStringExt},
        path::{Path, PathBuf},
    };

    use windows_sys::Win32::Storage::FileSystem::GetShortPathNameW;

    pub fn short_path(path: &Path) -> Option<PathBuf> {
        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(std::iter::once(0)).collect();
        // SAFETY: `wide` is a NUL-terminated UTF-16 buffer that outlives the call. Passing a null
        // output buffer with length 0 only queries the required length.
        let required = unsafe { GetShortPathNameW(wide.as_ptr(), std::ptr::null_mut(), 0) };
        if required == 0 {
            return None;
        }

        let mut buffer = vec![0_u16; required as usize];
        // SAFETY: `buffer` holds `required` elements as reported by the previous call, and both
        // pointers stay valid for the duration of the call.
        let written =
            unsafe { GetShortPathNameW(wide.as_ptr(), buffer.as_mut_ptr(), buffer.len() as u32) };
        if written == 0 || written as usize >= buffer.len() {
            return None;
        }
        buffer.truncate(written as usize);
        let short = PathBuf::from(OsString::from_wide(&buffer));

        short.as_os_str().is_ascii().then_some(short)
    }
}

#[cfg(not(target_os = "windows"))]
mod platform {
    use std::path::{Path, PathBuf};

    pub fn short_path(_path: &Path) -> Option<PathBuf> {
        None
    }
}
