//! Error and status codes with wire-stable values.
//!
//! Clients see plain numeric codes, so the values here must never change:
//! they mirror the classic errno table, negated, with the two exceptions
//! the protocol fixes explicitly (`EIO` and `EACCES`).

use serde::{Deserialize, Serialize};

/// Operation not permitted.
pub const EPERM: i64 = -1;
/// No such file or directory.
pub const ENOENT: i64 = -2;
/// Bad file descriptor.
pub const EBADF: i64 = -9;
/// Permission denied.
pub const EACCES: i64 = -13;
/// File already exists.
pub const EEXIST: i64 = -17;
/// Is a directory.
pub const EISDIR: i64 = -21;
/// Invalid argument.
pub const EINVAL: i64 = -22;
/// Local or remote I/O failure.
pub const EIO: i64 = -100;

/// Probe status: server granted a read-only session.
pub const MODE_R: i64 = 1;
/// Probe status: server granted a read-write session.
pub const MODE_RW: i64 = 2;

/// Open disposition requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenOption {
    /// Open an existing file or directory for reading.
    Read,
    /// Open an existing file for reading and writing.
    Write,
    /// Open for reading and writing, creating the file if absent.
    Create,
    /// Create a new file; fail if it already exists.
    CreateNew,
}

/// Seek origin for `lseek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Whence {
    FromStart,
    FromCurrent,
    FromEnd,
}

/// Map a local I/O failure to the errno a client should see.
pub fn io_errno(err: &std::io::Error) -> i64 {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => ENOENT,
        ErrorKind::PermissionDenied => EACCES,
        ErrorKind::AlreadyExists => EEXIST,
        _ => EIO,
    }
}
