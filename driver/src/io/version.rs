//! File version of an executable, read from its embedded version resource.

use std::path::Path;

use crate::error::ProcessError;

#[cfg(windows)]
#[allow(unsafe_code)]
pub fn file_version(exe: &Path) -> Result<String, ProcessError> {
    use std::ffi::c_void;
    use std::os::windows::ffi::OsStrExt;

    use windows::Win32::Storage::FileSystem::{
        GetFileVersionInfoSizeW, GetFileVersionInfoW, VS_FIXEDFILEINFO, VerQueryValueW,
    };
    use windows::core::{PCWSTR, w};

    let fail = |reason: String| ProcessError::Version {
        path: exe.to_path_buf(),
        reason,
    };

    let wide: Vec<u16> = exe.as_os_str().encode_wide().chain(Some(0)).collect();
    let name = PCWSTR(wide.as_ptr());

    // SAFETY: `name` points at a NUL-terminated buffer that outlives every call,
    // and `data` is sized to what GetFileVersionInfoSizeW reported.
    unsafe {
        let size = GetFileVersionInfoSizeW(name, None);
        if size == 0 {
            return Err(fail("no version resource".to_string()));
        }
        let mut data = vec![0u8; size as usize];
        GetFileVersionInfoW(name, 0, size, data.as_mut_ptr().cast::<c_void>())
            .map_err(|err| fail(err.to_string()))?;

        let mut info: *mut c_void = std::ptr::null_mut();
        let mut len = 0u32;
        let found = VerQueryValueW(
            data.as_ptr().cast::<c_void>(),
            w!("\\"),
            &mut info,
            &mut len,
        );
        if !found.as_bool() || info.is_null() || (len as usize) < size_of::<VS_FIXEDFILEINFO>() {
            return Err(fail("missing fixed file info".to_string()));
        }
        let fixed = &*(info as *const VS_FIXEDFILEINFO);
        Ok(format_version(fixed.dwFileVersionMS, fixed.dwFileVersionLS))
    }
}

#[cfg(not(windows))]
pub fn file_version(exe: &Path) -> Result<String, ProcessError> {
    Err(ProcessError::Version {
        path: exe.to_path_buf(),
        reason: "version resources are only readable on Windows".to_string(),
    })
}

/// `major.minor.build.revision` from the two packed version words.
pub fn format_version(most_significant: u32, least_significant: u32) -> String {
    format!(
        "{}.{}.{}.{}",
        most_significant >> 16,
        most_significant & 0xffff,
        least_significant >> 16,
        least_significant & 0xffff
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpacks_version_words() {
        assert_eq!(format_version(2018 << 16, (2 << 16) | 5), "2018.0.2.5");
        assert_eq!(format_version(2018 << 16, 520), "2018.0.0.520");
    }

    #[cfg(not(windows))]
    #[test]
    fn non_windows_reports_version_error() {
        let err = file_version(Path::new("/usr/bin/true")).unwrap_err();
        assert!(matches!(err, ProcessError::Version { .. }));
    }
}
