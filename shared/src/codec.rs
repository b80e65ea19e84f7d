//! JSON message codec.
//!
//! A sender writes exactly one JSON object per message, followed by a
//! newline. Stream transports do not preserve write boundaries, so the
//! receiving side runs bytes through a [`MessageDecoder`], which splits
//! back-to-back objects and holds on to partial ones until the rest arrives.

use crate::Message;
use serde_json::Value;
use thiserror::Error;

/// Upper bound on bytes buffered for a single undecoded message.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("message exceeds size limit ({0} bytes buffered)")]
    MessageTooLarge(usize),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decodes exactly one message from a complete blob.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::MalformedMessage(e.to_string()))
}

/// Incremental decoder for a stream of concatenated JSON messages.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buffer: Vec<u8>,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every message that is now complete.
    ///
    /// A well-formed object that is not a valid message is reported and
    /// skipped on its own. A syntax error discards input up to and including
    /// the next newline, so one garbage line does not take the messages after
    /// it down with it. Without a following newline the rest of the buffer is
    /// dropped and decoding restarts with the next read.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Message, CodecError>> {
        self.buffer.extend_from_slice(bytes);

        let mut decoded = Vec::new();
        let mut start = 0;
        loop {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.buffer[start..]).into_iter::<Value>();
            let failed = loop {
                match stream.next() {
                    Some(Ok(value)) => decoded.push(
                        serde_json::from_value::<Message>(value)
                            .map_err(|e| CodecError::MalformedMessage(e.to_string())),
                    ),
                    // Partial object, wait for the rest
                    Some(Err(e)) if e.is_eof() => break false,
                    Some(Err(e)) => {
                        decoded.push(Err(CodecError::MalformedMessage(e.to_string())));
                        break true;
                    }
                    None => break false,
                }
            };

            // Start of the value that could not be decoded, if any
            let offset = start + stream.byte_offset();
            if !failed {
                start = offset;
                break;
            }

            match next_line(&self.buffer[offset..]) {
                Some(skip) => start = offset + skip,
                None => {
                    start = self.buffer.len();
                    break;
                }
            }
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_MESSAGE_SIZE {
            decoded.push(Err(CodecError::MessageTooLarge(self.buffer.len())));
            self.buffer.clear();
        }

        decoded
    }

    /// Number of bytes held back waiting for the rest of a message.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

/// Bytes to skip so that decoding resumes after the line starting at
/// `bytes`, ignoring leading blank space.
fn next_line(bytes: &[u8]) -> Option<usize> {
    let blank = bytes.iter().take_while(|b| b.is_ascii_whitespace()).count();
    bytes[blank..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|newline| blank + newline + 1)
}
