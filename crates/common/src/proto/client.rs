//! Operations on the client <-> proxy wire.
//!
//! The shim on the client side is a stateless dispatcher: it forwards each
//! syscall as one request and hands the numeric reply straight back, so
//! every reply is either a bare code or a code plus a read payload.

use serde::{Deserialize, Serialize};

use crate::errno::{OpenOption, Whence};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientRequest {
    Open {
        path: String,
        option: OpenOption,
    },
    Read {
        fd: u64,
        len: u64,
    },
    Write {
        fd: u64,
        data: Vec<u8>,
    },
    Lseek {
        fd: u64,
        offset: i64,
        whence: Whence,
    },
    Close {
        fd: u64,
    },
    Unlink {
        path: String,
    },
    /// Client is finished; the proxy tears the session down.
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientReply {
    /// Descriptor, byte count, zero, or a negative errno.
    Code(i64),
    /// Reply to `Read`: byte count (or errno) plus the bytes read.
    Data { code: i64, data: Vec<u8> },
}
