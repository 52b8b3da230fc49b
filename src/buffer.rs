//! Per-socket buffered framing on top of `bytes::BytesMut`.
//!
//! A small growable-buffer abstraction sits in front of each raw socket
//! rather than a hand-rolled double-buffer swap: `bytes::BytesMut`'s
//! `split_to` already gives amortized, no-copy consumption.

use bytes::BytesMut;
use codec::{Error as CodecError, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Per-socket buffer capacity.
pub const BUFF_SIZE: usize = 1024;

#[derive(Default)]
pub struct SocketBuffer {
    bytes: BytesMut,
}

impl SocketBuffer {
    pub fn new() -> Self {
        Self {
            bytes: BytesMut::with_capacity(BUFF_SIZE),
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Attempts to decode one frame from the front of the buffer without
    /// consuming it. `Ok(None)` means wait for more bytes; an unknown lead
    /// byte is surfaced as `Err` so the caller can resync.
    pub fn try_decode(&self) -> Result<Option<(Frame, usize)>, CodecError> {
        match Frame::decode(&self.bytes) {
            Ok((frame, consumed)) => Ok(Some((frame, consumed))),
            Err(CodecError::Short) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn consume(&mut self, n: usize) {
        let _ = self.bytes.split_to(n);
    }

    /// Discards exactly one byte — the resync step for an unrecognized
    /// frame type.
    pub fn resync_one_byte(&mut self) {
        if !self.bytes.is_empty() {
            let _ = self.bytes.split_to(1);
        }
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Decodes and consumes one complete frame if the buffer holds one,
    /// discarding bytes ahead of any unrecognized type along the way.
    /// Returns `None` once the buffer is exhausted of complete frames.
    pub fn poll_complete_frame(&mut self) -> Option<Frame> {
        loop {
            match self.try_decode() {
                Ok(Some((frame, consumed))) => {
                    self.consume(consumed);
                    return Some(frame);
                }
                Ok(None) => return None,
                Err(_unknown_type) => {
                    self.resync_one_byte();
                    continue;
                }
            }
        }
    }

    /// Repeatedly reads from `stream`, handing each decoded frame to
    /// `extract`. `extract` returns `Ok(value)` to stop and yield `value`,
    /// or `Err(frame)` to discard the frame and keep waiting. Blocks with
    /// no timeout — used only for bootstrap/handover exchanges where
    /// exactly one frame class is acceptable.
    pub async fn read_exact_tcp<T>(
        &mut self,
        stream: &mut TcpStream,
        mut extract: impl FnMut(Frame) -> Result<T, Frame>,
    ) -> std::io::Result<T> {
        loop {
            while let Some(frame) = self.poll_complete_frame() {
                match extract(frame) {
                    Ok(value) => return Ok(value),
                    Err(_discarded) => continue,
                }
            }

            let mut scratch = [0u8; BUFF_SIZE];
            let n = stream.read(&mut scratch).await?;
            if n == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
            }
            self.append(&scratch[..n]);
        }
    }
}

pub async fn send_frame(stream: &mut TcpStream, frame: &Frame) -> std::io::Result<()> {
    let mut out = BytesMut::new();
    frame.encode(&mut out);
    stream.write_all(&out).await
}

pub fn encode(frame: &Frame) -> BytesMut {
    let mut out = BytesMut::new();
    frame.encode(&mut out);
    out
}
