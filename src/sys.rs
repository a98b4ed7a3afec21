//! System related APIs

use std::ffi::CString;
use std::io::{Error, ErrorKind, Result};

/// uid and primary gid of a user given by name or numeric id.
pub fn lookup_user(uname: &str) -> Option<(u32, u32)> {
    unsafe {
        let pwd = match uname.parse::<u32>() {
            Ok(uid) => libc::getpwuid(uid),
            Err(..) => {
                let uname = CString::new(uname).ok()?;
                libc::getpwnam(uname.as_ptr())
            }
        };

        if pwd.is_null() {
            return None;
        }

        let pwd = &*pwd;
        Some((pwd.pw_uid, pwd.pw_gid))
    }
}

/// gid of a group given by name or numeric id.
pub fn lookup_group(gname: &str) -> Option<u32> {
    unsafe {
        let grp = match gname.parse::<u32>() {
            Ok(gid) => libc::getgrgid(gid),
            Err(..) => {
                let gname = CString::new(gname).ok()?;
                libc::getgrnam(gname.as_ptr())
            }
        };

        if grp.is_null() {
            return None;
        }

        Some((*grp).gr_gid)
    }
}

/// Whether a process with this pid exists.
///
/// A process owned by another user still counts as alive.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send SIGTERM to `pid`.
pub fn terminate(pid: i32) -> Result<()> {
    if pid <= 0 {
        return Err(Error::new(ErrorKind::InvalidInput, "invalid pid"));
    }
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}
