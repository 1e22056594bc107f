//! Control-plane message framing.
//!
//! Every command and event is a frame: `msg_type_id` (u32 LE), `length`
//! (u32 LE), then `length` payload bytes. Readers validate the header against
//! the actual byte count before any payload field is touched.

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam::channel::{Receiver, Sender, TrySendError};
use thiserror::Error;

pub const FRAME_HEADER_LENGTH: usize = 8;
/// Bound on a single control message. Events must fit or they are dropped.
pub const MAX_FRAME_LENGTH: usize = 8192;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame truncated: got {got} bytes, need {need}")]
    Truncated { got: usize, need: usize },

    #[error("frame length {length} exceeds max {MAX_FRAME_LENGTH}")]
    TooLong { length: usize },

    #[error("frame length mismatch: header declares {declared}, buffer has {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Frame a message. Fails when the payload exceeds the frame bound.
pub fn encode_frame(msg_type_id: u32, payload: &[u8]) -> Result<Bytes, FrameError> {
    if FRAME_HEADER_LENGTH + payload.len() > MAX_FRAME_LENGTH {
        return Err(FrameError::TooLong {
            length: FRAME_HEADER_LENGTH + payload.len(),
        });
    }
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LENGTH + payload.len());
    buf.put_u32_le(msg_type_id);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Split a frame into (msg_type_id, payload), validating the header.
pub fn decode_frame(frame: &[u8]) -> Result<(u32, &[u8]), FrameError> {
    if frame.len() < FRAME_HEADER_LENGTH {
        return Err(FrameError::Truncated {
            got: frame.len(),
            need: FRAME_HEADER_LENGTH,
        });
    }
    let msg_type_id = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let declared = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
    let actual = frame.len() - FRAME_HEADER_LENGTH;
    if declared != actual {
        return Err(FrameError::LengthMismatch { declared, actual });
    }
    Ok((msg_type_id, &frame[FRAME_HEADER_LENGTH..]))
}

#[derive(Debug, Error)]
#[error("{reason} at offset {offset}")]
pub struct PayloadError {
    pub offset: usize,
    pub reason: String,
}

/// Checked little-endian reader over a flyweight payload.
///
/// Every accessor validates the remaining length first; decoding a hostile
/// frame can fail but never read out of bounds.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PayloadError> {
        if self.buf.len() - self.pos < n {
            return Err(PayloadError {
                offset: self.pos,
                reason: format!("need {n} bytes, have {}", self.buf.len() - self.pos),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, PayloadError> {
        Ok(self.take(1)?[0])
    }

    pub fn i32(&mut self) -> Result<i32, PayloadError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i64(&mut self) -> Result<i64, PayloadError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// i32 length prefix + UTF-8 bytes.
    pub fn string(&mut self) -> Result<String, PayloadError> {
        let length = self.i32()?;
        if length < 0 {
            return Err(PayloadError {
                offset: self.pos - 4,
                reason: format!("negative string length {length}"),
            });
        }
        let offset = self.pos;
        let bytes = self.take(length as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| PayloadError {
            offset,
            reason: "string is not utf-8".to_string(),
        })
    }

    /// Reject trailing bytes once all fields are read.
    pub fn finish(&mut self) -> Result<(), PayloadError> {
        if self.pos != self.buf.len() {
            return Err(PayloadError {
                offset: self.pos,
                reason: format!("{} trailing bytes after payload", self.buf.len() - self.pos),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RingWriteError {
    #[error("command ring full")]
    Full,

    #[error("command ring closed")]
    Closed,

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Create the client-to-driver command ring.
///
/// Multi-producer: clone the writer per client. The conductor drains the
/// receiver a bounded number of frames per tick.
pub fn command_ring(capacity: usize) -> (CommandRingWriter, Receiver<Bytes>) {
    let (tx, rx) = crossbeam::channel::bounded(capacity);
    (CommandRingWriter { tx }, rx)
}

/// Producer handle for the command ring.
#[derive(Clone)]
pub struct CommandRingWriter {
    tx: Sender<Bytes>,
}

impl CommandRingWriter {
    /// Frame and enqueue a command without blocking.
    pub fn write(&self, msg_type_id: u32, payload: &[u8]) -> Result<(), RingWriteError> {
        let frame = encode_frame(msg_type_id, payload)?;
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RingWriteError::Full),
            Err(TrySendError::Disconnected(_)) => Err(RingWriteError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frame = encode_frame(0x42, b"payload").unwrap();
        let (msg_type_id, payload) = decode_frame(&frame).unwrap();
        assert_eq!(msg_type_id, 0x42);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn decode_rejects_short_header() {
        assert!(matches!(
            decode_frame(&[1, 2, 3]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        let mut frame = encode_frame(1, b"abcd").unwrap().to_vec();
        frame.truncate(frame.len() - 1);
        assert!(matches!(
            decode_frame(&frame),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn encode_rejects_oversize() {
        let payload = vec![0u8; MAX_FRAME_LENGTH];
        assert!(matches!(
            encode_frame(1, &payload),
            Err(FrameError::TooLong { .. })
        ));
    }

    #[test]
    fn ring_reports_full_without_blocking() {
        let (writer, _rx) = command_ring(1);
        writer.write(1, b"a").unwrap();
        assert!(matches!(writer.write(1, b"b"), Err(RingWriteError::Full)));
    }
}
