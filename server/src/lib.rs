//! # Match Judge Server Library
//!
//! This library provides the authoritative judge for a turn-based match between
//! a fixed roster of remote participants. It registers the expected teams,
//! drives the match through discrete rounds and ends it on completion, timeout
//! or disconnection.
//!
//! ## Core Responsibilities
//!
//! ### Registration
//! Every identity listed in the configuration must register before the
//! registration deadline. Once the roster is complete a single `gamestart`
//! is broadcast and the judge waits for every participant to report ready.
//!
//! ### Round Synchronization
//! Each round broadcasts one `inquiry` and collects at most one `response`
//! per participant. The round closes when everyone has answered or when its
//! deadline passes, and the collected moves are handed to the round resolver.
//!
//! ### Termination
//! The match ends when the round ceiling is reached, when a participant has
//! missed too many deadlines, when a registered participant disconnects, or
//! when the process is asked to shut down. Every connection receives one
//! `gameover` naming the reason before it is closed.
//!
//! ## Architecture Design
//!
//! ### Single Sequencer
//! All match state is owned by one [`judge::Judge`] living on a single task.
//! Connection readers, the registration timer and the deadline tick only post
//! [`judge::JudgeEvent`]s into a channel; nothing else touches the state, so
//! there are no locks and event handling is deterministic.
//!
//! ### TCP Transport
//! Participants connect over TCP. Each connection gets a reader task that
//! decodes the JSON stream and a writer task that drains an outbound queue,
//! so a slow peer never blocks the judge.
//!
//! ## Module Organization
//!
//! - `registry`: live connections and identity bindings, unicast/broadcast
//! - `match_state`: roster, phase, round counter and resolver state
//! - `barrier`: per-round pending set, responses and deadline
//! - `resolver`: the round resolution capability and the tally resolver
//! - `judge`: the phase state machine tying the above together
//! - `network`: accept loop, connection tasks and the sequencer loop
//! - `config` and `error`: validated settings and typed failures
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::MatchConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MatchConfig::from_team_list("team1,team2")?;
//!     let server = Server::bind("127.0.0.1:6001", config).await?;
//!
//!     // Runs registration, every round and the final gameover
//!     let outcome = server.run().await?;
//!     println!("{} after {} rounds", outcome.reason, outcome.total_rounds);
//!
//!     Ok(())
//! }
//! ```

pub mod barrier;
pub mod config;
pub mod error;
pub mod judge;
pub mod match_state;
pub mod network;
pub mod registry;
pub mod resolver;
