//! Framed bincode transport.
//!
//! Every message on either wire is one frame: a little-endian u32 length
//! followed by the bincode encoding of the message enum. Frames are capped
//! so a corrupt peer cannot make us allocate unbounded buffers.

mod chunk;
mod client;
mod server;

pub use chunk::{ChunkResponse, UploadChunk, CHUNK_SIZE};
pub use client::{ClientReply, ClientRequest};
pub use server::{ServerRequest, ServerResponse};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one frame: a few chunks of payload plus envelope slack.
pub const MAX_FRAME: usize = 4 * CHUNK_SIZE + 1024;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME} byte limit")]
    Oversized(usize),
}

/// Encode `msg` and write it as one frame.
pub async fn write_frame<W, T>(io: &mut W, msg: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = bincode::serialize(msg)?;
    if bytes.len() > MAX_FRAME {
        return Err(WireError::Oversized(bytes.len()));
    }
    io.write_u32_le(bytes.len() as u32).await?;
    io.write_all(&bytes).await?;
    io.flush().await?;
    Ok(())
}

/// Read one frame and decode it.
pub async fn read_frame<R, T>(io: &mut R) -> Result<T, WireError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = io.read_u32_le().await? as usize;
    if len > MAX_FRAME {
        return Err(WireError::Oversized(len));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    Ok(bincode::deserialize(&buf)?)
}
