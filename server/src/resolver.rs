//! Round resolution capability.
//!
//! The judge never looks inside game state. Once per round it hands the
//! collected responses to a [`RoundResolver`] and stores whatever state
//! comes back.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Responses collected for one round, keyed by participant identity.
/// Participants that did not answer in time are absent.
pub type Responses = BTreeMap<String, Value>;

pub trait RoundResolver {
    type State: Debug;

    fn initial_state(&self, roster: &[String]) -> Self::State;

    /// Advances the game by one round.
    ///
    /// Must be total: any response set, including an empty or partial one,
    /// yields a new state. A missing response counts as a no-op move.
    fn resolve(&self, state: &Self::State, round: u32, responses: &Responses) -> Self::State;
}

/// Bookkeeping resolver: records moves without interpreting them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TallyResolver;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Tally {
    pub roster: Vec<String>,
    pub rounds_resolved: u32,
    pub submitted: BTreeMap<String, u32>,
    pub missed: BTreeMap<String, u32>,
    pub last_moves: BTreeMap<String, Value>,
}

impl RoundResolver for TallyResolver {
    type State = Tally;

    fn initial_state(&self, roster: &[String]) -> Tally {
        Tally {
            roster: roster.to_vec(),
            ..Tally::default()
        }
    }

    fn resolve(&self, state: &Tally, round: u32, responses: &Responses) -> Tally {
        let mut next = state.clone();
        next.rounds_resolved = round;

        for identity in &state.roster {
            match responses.get(identity) {
                Some(data) => {
                    *next.submitted.entry(identity.clone()).or_insert(0) += 1;
                    next.last_moves.insert(identity.clone(), data.clone());
                }
                None => *next.missed.entry(identity.clone()).or_insert(0) += 1,
            }
        }

        next
    }
}
