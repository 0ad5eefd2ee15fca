use super::error::PeerError;
use crate::constants::{HANDSHAKE_LEN, LENGTH_PREFIX_LEN, MAX_MESSAGE_SIZE, READ_BUFFER_CAPACITY};
use bytes::{Bytes, BytesMut};

/// One complete unit cut from the inbound byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The 68 bytes of the peer's handshake.
    Handshake(Bytes),
    /// A length-prefixed message, prefix included.
    Message(Bytes),
}

/// Turns an arbitrary sequence of reads into whole protocol frames.
///
/// The first frame of a connection is always the fixed-size handshake;
/// after it has been cut, framing switches permanently to length-prefix
/// mode.
///
/// # Examples
///
/// ```
/// use swarmwire::peer::{Frame, Message, StreamFramer};
///
/// let mut framer = StreamFramer::after_handshake();
/// let bytes = Message::Have { piece: 3 }.encode();
///
/// framer.extend(&bytes[..2]);
/// assert!(framer.next_frame().unwrap().is_none());
///
/// framer.extend(&bytes[2..]);
/// assert_eq!(framer.next_frame().unwrap(), Some(Frame::Message(bytes)));
/// ```
#[derive(Debug)]
pub struct StreamFramer {
    buf: BytesMut,
    handshake_pending: bool,
    max_message_size: usize,
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFramer {
    /// A framer for a fresh connection, expecting the handshake first.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            handshake_pending: true,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// A framer that starts directly in length-prefix mode.
    pub fn after_handshake() -> Self {
        Self {
            handshake_pending: false,
            ..Self::new()
        }
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// The accumulator, for reading from a socket straight into it.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn is_awaiting_handshake(&self) -> bool {
        self.handshake_pending
    }

    /// Drops whatever partial frame is buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Cuts the next complete frame off the front of the accumulator.
    ///
    /// Returns `Ok(None)` until enough bytes have arrived.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, PeerError> {
        if self.buf.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let total_len = if self.handshake_pending {
            HANDSHAKE_LEN
        } else {
            let length =
                u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
            if length > self.max_message_size {
                return Err(PeerError::MessageTooLarge(length));
            }
            LENGTH_PREFIX_LEN + length
        };

        if self.buf.len() < total_len {
            self.buf.reserve(total_len - self.buf.len());
            return Ok(None);
        }

        let data = self.buf.split_to(total_len).freeze();
        if self.handshake_pending {
            self.handshake_pending = false;
            Ok(Some(Frame::Handshake(data)))
        } else {
            Ok(Some(Frame::Message(data)))
        }
    }
}
