//! Framing primitives: big-endian integers and exact-length reads.
//!
//! File upload: `u32 name_len | name | u64 size | body`.
//! Video: repeated `u32 len | payload`, `len == 0` ends the stream.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ProtocolError;

/// Exclusive upper bound on file name length
pub const MAX_NAME_LEN: u32 = 256;

const FRAME_LEN_SIZE: usize = 4;

/// Decoded upload header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub name: String,
    pub size: u64,
}

impl FileHeader {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Encode the header; fails if the name is empty or 256 bytes or longer.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let name = self.name.as_bytes();
        let name_len =
            u32::try_from(name.len()).map_err(|_| ProtocolError::InvalidNameLength(u32::MAX))?;
        validate_name_len(name_len)?;
        let mut out = BytesMut::with_capacity(4 + name.len() + 8);
        out.put_u32(name_len);
        out.put_slice(name);
        out.put_u64(self.size);
        Ok(out.freeze())
    }

    /// Read a header with exact-length reads.
    ///
    /// The length check happens before the name is read, so a bad length never
    /// consumes anything past the first four bytes.
    pub async fn read_from<R>(reader: &mut R) -> crate::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let name_len = reader.read_u32().await?;
        validate_name_len(name_len)?;
        let name = read_exact_vec(reader, name_len as usize).await?;
        let size = reader.read_u64().await?;
        Ok(Self {
            name: String::from_utf8_lossy(&name).into_owned(),
            size,
        })
    }
}

pub fn validate_name_len(name_len: u32) -> Result<(), ProtocolError> {
    if name_len == 0 || name_len >= MAX_NAME_LEN {
        return Err(ProtocolError::InvalidNameLength(name_len));
    }
    Ok(())
}

/// One video frame header as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    /// Zero length: producer is done
    End,
    /// A payload of this many bytes follows
    Data(u32),
}

impl FrameHeader {
    pub fn from_len(len: u32) -> Self {
        if len == 0 {
            FrameHeader::End
        } else {
            FrameHeader::Data(len)
        }
    }

    pub async fn read_from<R>(reader: &mut R) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        reader.read_u32().await.map(Self::from_len)
    }
}

/// Length prefix for a payload of `len` bytes; fails if it does not fit in u32
pub fn video_frame_len(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
        len: u64::try_from(len).unwrap_or(u64::MAX),
        limit: u64::from(u32::MAX),
    })
}

/// Length-prefix a video payload
pub fn encode_video_frame(payload: &[u8]) -> Result<Bytes, ProtocolError> {
    let len = video_frame_len(payload.len())?;
    let mut out = BytesMut::with_capacity(FRAME_LEN_SIZE + payload.len());
    out.put_u32(len);
    out.put_slice(payload);
    Ok(out.freeze())
}

/// End-of-stream marker for a video connection
pub fn encode_video_end() -> Bytes {
    Bytes::from_static(&[0, 0, 0, 0])
}

/// Read exactly `len` bytes or fail with `UnexpectedEof`
pub async fn read_exact_vec<R>(reader: &mut R, len: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}
