//! Wire protocol shared by the judge server and its participants.
//!
//! Every logical message is a single flat JSON object tagged by a `type`
//! field. See [`codec`] for how messages are framed on a byte stream.

pub mod codec;

pub use codec::{decode, encode, CodecError, MessageDecoder, MAX_MESSAGE_SIZE};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const DEFAULT_PORT: u16 = 6001;
pub const DEFAULT_MAX_ROUNDS: u32 = 500;
pub const DEFAULT_ROUND_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_MAX_TIMEOUTS: u32 = 10;
pub const DEFAULT_REGISTRATION_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Register {
        identity: String,
        display_name: String,
        team_name: String,
    },
    GameStart {
        max_rounds: u32,
    },
    GameReady {
        identity: String,
    },
    Inquiry {
        round: u32,
    },
    Response {
        identity: String,
        round: u32,
        data: Value,
    },
    GameOver {
        reason: String,
        total_rounds: u32,
    },
}

impl Message {
    /// The value of the `type` field this message is tagged with.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Register { .. } => "register",
            Message::GameStart { .. } => "gamestart",
            Message::GameReady { .. } => "gameready",
            Message::Inquiry { .. } => "inquiry",
            Message::Response { .. } => "response",
            Message::GameOver { .. } => "gameover",
        }
    }

    /// Identity the sender claims to speak for, if the message carries one.
    pub fn identity(&self) -> Option<&str> {
        match self {
            Message::Register { identity, .. }
            | Message::GameReady { identity }
            | Message::Response { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn is_client_message(&self) -> bool {
        matches!(
            self,
            Message::Register { .. } | Message::GameReady { .. } | Message::Response { .. }
        )
    }
}

/// One of the two fixed sides of the field.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}
