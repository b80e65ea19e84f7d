//! Per-round response barrier.
//!
//! A barrier is opened when a round's inquiry goes out and closes either
//! when every participant has answered or when the deadline passes. Late and
//! duplicate responses are dropped silently.

use crate::resolver::Responses;
use log::debug;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    /// Deadline set, nobody has answered yet
    Open,
    /// Some but not all responses are in
    Closing,
    Complete,
    TimedOut,
}

/// What happened to a response handed to [`RoundBarrier::receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    Accepted { remaining: usize },
    /// This response was the last one missing
    Completed,
    Ignored,
}

#[derive(Debug)]
pub struct RoundBarrier {
    round: u32,
    state: BarrierState,
    deadline: Instant,
    pending: BTreeSet<String>,
    responses: Responses,
}

impl RoundBarrier {
    pub fn start<I>(round: u32, participants: I, deadline: Instant) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let pending: BTreeSet<String> = participants.into_iter().collect();
        let state = if pending.is_empty() {
            BarrierState::Complete
        } else {
            BarrierState::Open
        };

        Self {
            round,
            state,
            deadline,
            pending,
            responses: Responses::new(),
        }
    }

    pub fn receive(&mut self, identity: &str, payload: Value) -> Receipt {
        if self.is_closed() || !self.pending.remove(identity) {
            debug!(
                "Round {}: ignoring response from {} ({:?})",
                self.round, identity, self.state
            );
            return Receipt::Ignored;
        }

        self.responses.insert(identity.to_string(), payload);

        if self.pending.is_empty() {
            self.state = BarrierState::Complete;
            Receipt::Completed
        } else {
            self.state = BarrierState::Closing;
            Receipt::Accepted {
                remaining: self.pending.len(),
            }
        }
    }

    /// Times the round out if the deadline has passed with responses still
    /// missing, returning who failed to answer.
    pub fn check_deadline(&mut self, now: Instant) -> Option<Vec<String>> {
        if self.is_closed() || now <= self.deadline || self.pending.is_empty() {
            return None;
        }

        self.state = BarrierState::TimedOut;
        Some(self.pending.iter().cloned().collect())
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, BarrierState::Complete | BarrierState::TimedOut)
    }

    pub fn state(&self) -> BarrierState {
        self.state
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    /// Consumes the barrier, yielding whatever responses were collected.
    pub fn into_responses(self) -> Responses {
        self.responses
    }
}
