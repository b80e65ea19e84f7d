//! Error types for the judge server.

use thiserror::Error;

/// Failures of the connection registry primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("identity {0} is already bound to a connection")]
    DuplicateIdentity(String),
    #[error("peer {0} is unreachable")]
    PeerUnreachable(String),
}

/// Rejected match state transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("identity {0} is not on the expected roster")]
    UnknownIdentity(String),
    #[error("identity {0} is already registered")]
    AlreadyRegistered(String),
    #[error("registration is closed")]
    RosterClosed,
    #[error("round ceiling of {0} reached")]
    MaxRoundsReached(u32),
}

/// Invalid startup configuration. Always fatal before any socket is opened.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least two team identities are required, got {0}")]
    TooFewTeams(usize),
    #[error("team identity list contains an empty entry")]
    EmptyTeam,
    #[error("team identity {0} is listed more than once")]
    DuplicateTeam(String),
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
}
