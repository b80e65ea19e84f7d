//! Authoritative match state: roster, phase, round counter and the opaque
//! resolver state.

use crate::config::MatchConfig;
use crate::error::MatchError;
use crate::resolver::{Responses, RoundResolver};
use log::{debug, info};
use shared::Side;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    WaitingRegistration,
    WaitingReady,
    RoundInProgress,
    Ended,
}

/// Why a match ended. `Display` yields the reason sent in `gameover`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    GameCompleted,
    RegistrationTimeout,
    RoundTimeout,
    Disconnected(String),
    Shutdown,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::GameCompleted => write!(f, "Game completed"),
            EndReason::RegistrationTimeout => write!(f, "Registration timeout"),
            EndReason::RoundTimeout => write!(f, "Round timeout"),
            EndReason::Disconnected(identity) => write!(f, "Team {} disconnected", identity),
            EndReason::Shutdown => write!(f, "Server shutdown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub identity: String,
    pub display_name: String,
    pub team_name: String,
    pub side: Side,
    pub ready: bool,
    /// Rounds this participant failed to answer before the deadline
    pub timeouts: u32,
}

pub struct MatchState<R: RoundResolver> {
    config: MatchConfig,
    participants: HashMap<String, Participant>,
    phase: MatchPhase,
    current_round: u32,
    round_deadline: Option<Instant>,
    resolver: R,
    resolver_state: R::State,
    end_reason: Option<EndReason>,
}

impl<R: RoundResolver> MatchState<R> {
    /// Creates a match waiting for registrations
    ///
    /// The resolver state is seeded from the configured roster before anyone
    /// connects.
    pub fn new(config: MatchConfig, resolver: R) -> Self {
        let resolver_state = resolver.initial_state(config.teams());
        Self {
            config,
            participants: HashMap::new(),
            phase: MatchPhase::WaitingRegistration,
            current_round: 0,
            round_deadline: None,
            resolver,
            resolver_state,
            end_reason: None,
        }
    }

    /// Adds a participant to the roster and returns its side.
    ///
    /// The first identity of the configured roster plays left, all others
    /// play right, regardless of the order in which they register.
    pub fn register_participant(
        &mut self,
        identity: &str,
        display_name: &str,
        team_name: &str,
    ) -> Result<Side, MatchError> {
        if self.phase != MatchPhase::WaitingRegistration {
            return Err(MatchError::RosterClosed);
        }

        let position = self
            .config
            .teams()
            .iter()
            .position(|team| team == identity)
            .ok_or_else(|| MatchError::UnknownIdentity(identity.to_string()))?;

        if self.participants.contains_key(identity) {
            return Err(MatchError::AlreadyRegistered(identity.to_string()));
        }

        let side = if position == 0 { Side::Left } else { Side::Right };
        self.participants.insert(
            identity.to_string(),
            Participant {
                identity: identity.to_string(),
                display_name: display_name.to_string(),
                team_name: team_name.to_string(),
                side,
                ready: false,
                timeouts: 0,
            },
        );

        info!("Team registered: {} ({}) on the {} side", identity, display_name, side);
        Ok(side)
    }

    /// Whether every configured identity has registered
    pub fn all_registered(&self) -> bool {
        self.config
            .teams()
            .iter()
            .all(|team| self.participants.contains_key(team))
    }

    /// Expected identities that have not registered, in roster order.
    pub fn missing_identities(&self) -> Vec<String> {
        self.config
            .teams()
            .iter()
            .filter(|team| !self.participants.contains_key(*team))
            .cloned()
            .collect()
    }

    /// Freezes the roster once everyone is present.
    pub fn close_registration(&mut self) -> Result<(), MatchError> {
        if self.phase != MatchPhase::WaitingRegistration {
            return Err(MatchError::RosterClosed);
        }
        if let Some(missing) = self.missing_identities().into_iter().next() {
            return Err(MatchError::UnknownIdentity(missing));
        }
        self.phase = MatchPhase::WaitingReady;
        Ok(())
    }

    /// Marks a participant ready. Returns false if it already was.
    pub fn mark_ready(&mut self, identity: &str) -> Result<bool, MatchError> {
        let participant = self
            .participants
            .get_mut(identity)
            .ok_or_else(|| MatchError::UnknownIdentity(identity.to_string()))?;

        let newly_ready = !participant.ready;
        participant.ready = true;
        Ok(newly_ready)
    }

    /// Whether every registered participant has sent `gameready`
    ///
    /// An empty roster is never ready.
    pub fn all_ready(&self) -> bool {
        !self.participants.is_empty() && self.participants.values().all(|p| p.ready)
    }

    /// Leaves the ready phase and starts playing rounds
    pub fn begin_rounds(&mut self) {
        self.phase = MatchPhase::RoundInProgress;
    }

    /// Moves to the next round and returns its number.
    pub fn advance_round(&mut self) -> Result<u32, MatchError> {
        if self.current_round >= self.config.max_rounds {
            return Err(MatchError::MaxRoundsReached(self.config.max_rounds));
        }
        self.current_round += 1;
        Ok(self.current_round)
    }

    /// Records when the current round times out
    pub fn set_round_deadline(&mut self, deadline: Instant) {
        self.round_deadline = Some(deadline);
    }

    /// Hands the round's responses to the resolver and keeps its new state.
    pub fn apply_round_result(&mut self, responses: &Responses) {
        debug!(
            "Resolving round {} with {} of {} responses",
            self.current_round,
            responses.len(),
            self.participants.len()
        );
        self.resolver_state =
            self.resolver
                .resolve(&self.resolver_state, self.current_round, responses);
    }

    /// Counts a missed deadline against `identity` and returns its total.
    pub fn record_timeout(&mut self, identity: &str) -> u32 {
        match self.participants.get_mut(identity) {
            Some(participant) => {
                participant.timeouts += 1;
                participant.timeouts
            }
            None => 0,
        }
    }

    /// Ends the match. Returns false if it had already ended; the first
    /// reason is kept.
    pub fn end(&mut self, reason: EndReason) -> bool {
        if self.phase == MatchPhase::Ended {
            return false;
        }
        self.phase = MatchPhase::Ended;
        self.round_deadline = None;
        self.end_reason = Some(reason);
        true
    }

    /// Current phase of the match
    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Number of the round in progress, 0 before the first
    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    /// Deadline of the current round, once one has started
    pub fn round_deadline(&self) -> Option<Instant> {
        self.round_deadline
    }

    /// Why the match ended, if it has
    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end_reason.as_ref()
    }

    /// Looks up a registered participant
    pub fn participant(&self, identity: &str) -> Option<&Participant> {
        self.participants.get(identity)
    }

    /// Registered identities in roster order.
    pub fn roster(&self) -> Vec<String> {
        self.config
            .teams()
            .iter()
            .filter(|team| self.participants.contains_key(*team))
            .cloned()
            .collect()
    }

    /// Configuration the match was created with
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// State accumulated by the resolver so far
    pub fn resolver_state(&self) -> &R::State {
        &self.resolver_state
    }

    /// Consumes the match and returns the final resolver state
    pub fn into_resolver_state(self) -> R::State {
        self.resolver_state
    }
}
