//! Two-stage message framing.
//!
//! The wire format has no length prefix. A message is written with a single
//! write call; the receiver reads exactly one byte (the "header") and then
//! issues one read of up to [`PAYLOAD_CAPACITY`] bytes. The header byte and
//! whatever that second read returned form one message.
//!
//! ```text
//! ┌────────────────┐  1 byte read   ┌─────────────────┐
//! │ AwaitingHeader │───────────────>│ AwaitingPayload │
//! └────────────────┘                └─────────────────┘
//!         ^                                  │
//!         │        N > 0 bytes read,         │
//!         └──── message = header ++ payload ─┘
//! ```
//!
//! # Limitations
//!
//! This is not a general framing protocol and the codec does not pretend to be
//! one:
//!
//! - A message must fit in `1 + PAYLOAD_CAPACITY` bytes.
//! - At least one payload byte must follow the header byte, so single-byte
//!   messages cannot be delivered.
//! - Two messages that are both buffered before the payload read completes are
//!   delivered as a single message.
//!
//! [`FrameCodec::encode`] refuses messages that violate the first two rules.
//! The third one is a property of the peer's write pattern.
//!
//! Text is UTF-8 on both the encode and decode side.

use crate::error::FrameError;

/// Size of the header read.
pub const HEADER_LEN: usize = 1;

/// Capacity of the payload read.
pub const PAYLOAD_CAPACITY: usize = 1024;

/// Largest encodable message, in bytes.
pub const MAX_MESSAGE_LEN: usize = HEADER_LEN + PAYLOAD_CAPACITY;

/// Smallest encodable message, in bytes (header plus one payload byte).
pub const MIN_MESSAGE_LEN: usize = HEADER_LEN + 1;

/// Which read the codec is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Waiting for the single header byte.
    AwaitingHeader,
    /// Header received, waiting for the payload read.
    AwaitingPayload,
}

/// Per-connection framing state machine.
///
/// The codec owns the read buffers. A driver loops over
/// [`read_buffer`](Self::read_buffer) → read → [`complete_read`](Self::complete_read)
/// with exactly one read outstanding at a time.
#[derive(Debug)]
pub struct FrameCodec {
    state: FrameState,
    header: [u8; HEADER_LEN],
    payload: Box<[u8]>,
}

impl FrameCodec {
    /// Create a codec in [`FrameState::AwaitingHeader`].
    pub fn new() -> Self {
        Self {
            state: FrameState::AwaitingHeader,
            header: [0; HEADER_LEN],
            payload: vec![0; PAYLOAD_CAPACITY].into_boxed_slice(),
        }
    }

    /// Current state.
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Buffer the next read must fill.
    ///
    /// One byte long while awaiting the header, [`PAYLOAD_CAPACITY`] bytes
    /// while awaiting the payload.
    pub fn read_buffer(&mut self) -> &mut [u8] {
        match self.state {
            FrameState::AwaitingHeader => &mut self.header,
            FrameState::AwaitingPayload => &mut self.payload,
        }
    }

    /// Report that the outstanding read completed with `n` bytes.
    ///
    /// Returns `Ok(Some(message))` when a payload read completes, `Ok(None)`
    /// after the header read.
    ///
    /// # Errors
    ///
    /// - [`FrameError::EndOfStream`] if `n == 0`
    /// - [`FrameError::InvalidUtf8`] if header and payload are not UTF-8
    ///
    /// Either way the codec is back in [`FrameState::AwaitingHeader`].
    pub fn complete_read(&mut self, n: usize) -> Result<Option<String>, FrameError> {
        if n == 0 {
            self.state = FrameState::AwaitingHeader;
            return Err(FrameError::EndOfStream);
        }

        match self.state {
            FrameState::AwaitingHeader => {
                self.state = FrameState::AwaitingPayload;
                Ok(None)
            },
            FrameState::AwaitingPayload => {
                self.state = FrameState::AwaitingHeader;

                let n = n.min(PAYLOAD_CAPACITY);
                let mut bytes = Vec::with_capacity(HEADER_LEN + n);
                bytes.extend_from_slice(&self.header);
                bytes.extend_from_slice(&self.payload[..n]);

                String::from_utf8(bytes).map(Some).map_err(|_| FrameError::InvalidUtf8)
            },
        }
    }

    /// Validate an outgoing message and return the bytes to write.
    ///
    /// The whole slice must go out in a single write so the peer sees header
    /// and payload back to back.
    ///
    /// # Errors
    ///
    /// Rejects messages the receiving codec could not reassemble: empty,
    /// shorter than [`MIN_MESSAGE_LEN`] or longer than [`MAX_MESSAGE_LEN`]
    /// bytes.
    pub fn encode(message: &str) -> Result<&[u8], FrameError> {
        let bytes = message.as_bytes();
        match bytes.len() {
            0 => Err(FrameError::EmptyMessage),
            len if len < MIN_MESSAGE_LEN => Err(FrameError::MessageTooShort { len }),
            len if len > MAX_MESSAGE_LEN => {
                Err(FrameError::MessageTooLarge { len, max: MAX_MESSAGE_LEN })
            },
            _ => Ok(bytes),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}
