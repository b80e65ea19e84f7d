//! Match control loop.
//!
//! [`Judge`] is the only place where match state changes. Network tasks turn
//! socket activity into [`JudgeEvent`]s and the sequencer feeds them in one
//! at a time together with the current time, so the whole state machine is
//! synchronous and deterministic:
//!
//! ```text
//! WaitingRegistration --all registered--> WaitingReady --all ready--> RoundInProgress
//!          |                                   |                          |
//!          +-------- timeout / disconnect -----+---- ceiling / timeout ---+--> Ended
//! ```
//!
//! Outbound messages are only queued through the [`ConnectionRegistry`];
//! nothing here waits on the network.

use crate::barrier::{Receipt, RoundBarrier};
use crate::config::MatchConfig;
use crate::error::MatchError;
use crate::match_state::{EndReason, MatchPhase, MatchState, Participant};
use crate::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::resolver::{RoundResolver, TallyResolver};
use log::{debug, error, info, warn};
use serde_json::Value;
use shared::Message;
use std::time::Instant;

/// Inputs to the control loop, produced by network tasks and timers
#[derive(Debug)]
pub enum JudgeEvent {
    Connected {
        connection: Connection,
    },
    MessageReceived {
        connection_id: ConnectionId,
        message: Message,
    },
    /// Bytes that could not be decoded into a message
    Malformed {
        connection_id: ConnectionId,
        error: String,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
    RegistrationDeadline,
    /// Periodic wake-up to evaluate the round deadline
    Tick,
    Shutdown,
}

/// Final result of a match
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome<S> {
    pub reason: EndReason,
    pub total_rounds: u32,
    pub state: S,
}

pub struct Judge<R: RoundResolver = TallyResolver> {
    registry: ConnectionRegistry,
    state: MatchState<R>,
    barrier: Option<RoundBarrier>,
}

impl Judge<TallyResolver> {
    pub fn new(config: MatchConfig) -> Self {
        Self::with_resolver(config, TallyResolver)
    }
}

impl<R: RoundResolver> Judge<R> {
    pub fn with_resolver(config: MatchConfig, resolver: R) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            state: MatchState::new(config, resolver),
            barrier: None,
        }
    }

    pub fn handle(&mut self, event: JudgeEvent, now: Instant) {
        if self.is_finished() {
            debug!("Match over, ignoring {:?}", event);
            return;
        }

        match event {
            JudgeEvent::Connected { connection } => self.registry.admit(connection),
            JudgeEvent::MessageReceived {
                connection_id,
                message,
            } => self.on_message(connection_id, message, now),
            JudgeEvent::Malformed {
                connection_id,
                error,
            } => warn!("Dropping malformed input from connection {}: {}", connection_id, error),
            JudgeEvent::Disconnected { connection_id } => self.on_disconnect(connection_id),
            JudgeEvent::RegistrationDeadline => self.on_registration_deadline(),
            JudgeEvent::Tick => self.on_tick(now),
            JudgeEvent::Shutdown => self.end_match(EndReason::Shutdown),
        }
    }

    fn on_message(&mut self, connection_id: ConnectionId, message: Message, now: Instant) {
        if !self.registry.contains(connection_id) {
            warn!("Message from unknown connection {}", connection_id);
            return;
        }

        if !message.is_client_message() {
            warn!(
                "Connection {} sent server-only message {}",
                connection_id,
                message.kind()
            );
            return;
        }

        debug!(
            "Connection {} sent {} for {}",
            connection_id,
            message.kind(),
            message.identity().unwrap_or("-")
        );

        match message {
            Message::Register {
                identity,
                display_name,
                team_name,
            } => self.on_register(connection_id, &identity, &display_name, &team_name),
            Message::GameReady { identity } => self.on_ready(connection_id, &identity, now),
            Message::Response {
                identity,
                round,
                data,
            } => self.on_response(connection_id, &identity, round, data, now),
            Message::GameStart { .. } | Message::Inquiry { .. } | Message::GameOver { .. } => {}
        }
    }

    fn on_register(
        &mut self,
        connection_id: ConnectionId,
        identity: &str,
        display_name: &str,
        team_name: &str,
    ) {
        if self.phase() != MatchPhase::WaitingRegistration {
            warn!("Registration of {} after registration closed", identity);
            return;
        }

        if let Some(existing) = self.registry.identity_of(connection_id) {
            warn!(
                "Connection {} already registered as {}, ignoring register for {}",
                connection_id, existing, identity
            );
            return;
        }

        if let Err(e) = self
            .state
            .register_participant(identity, display_name, team_name)
        {
            warn!("Rejected registration: {}", e);
            return;
        }

        if let Err(e) = self.registry.add(identity, connection_id) {
            error!("Registered {} but could not bind its connection: {}", identity, e);
            return;
        }

        if !self.state.all_registered() {
            return;
        }

        if let Err(e) = self.state.close_registration() {
            error!("Failed to close registration: {}", e);
            return;
        }

        info!("All teams registered. Starting game...");
        let failed = self.registry.broadcast(&Message::GameStart {
            max_rounds: self.state.config().max_rounds,
        });
        self.handle_send_failures(failed);
    }

    fn on_ready(&mut self, connection_id: ConnectionId, identity: &str, now: Instant) {
        if self.phase() != MatchPhase::WaitingReady {
            warn!("Unexpected gameready from {} in {:?}", identity, self.phase());
            return;
        }
        if !self.speaks_for(connection_id, identity) {
            return;
        }

        match self.state.mark_ready(identity) {
            Ok(true) => info!("Team {} is ready", identity),
            Ok(false) => debug!("Team {} was already ready", identity),
            Err(e) => {
                warn!("Rejected gameready: {}", e);
                return;
            }
        }

        if self.state.all_ready() {
            info!("All teams are ready. Starting rounds...");
            self.state.begin_rounds();
            self.start_round(now);
        }
    }

    fn on_response(
        &mut self,
        connection_id: ConnectionId,
        identity: &str,
        round: u32,
        data: Value,
        now: Instant,
    ) {
        if self.phase() != MatchPhase::RoundInProgress {
            warn!("Unexpected response from {} in {:?}", identity, self.phase());
            return;
        }
        if !self.speaks_for(connection_id, identity) {
            return;
        }
        if self.expire_round(now) {
            debug!(
                "Response from {} for round {} arrived after the deadline",
                identity, round
            );
            return;
        }
        if round != self.state.current_round() {
            debug!(
                "Dropping response from {} for round {} during round {}",
                identity,
                round,
                self.state.current_round()
            );
            return;
        }

        let Some(barrier) = self.barrier.as_mut() else {
            return;
        };

        match barrier.receive(identity, data) {
            Receipt::Accepted { remaining } => {
                debug!("Received response from {}, {} outstanding", identity, remaining)
            }
            Receipt::Completed => {
                debug!("All teams responded to round {}", round);
                self.finish_round(now);
            }
            Receipt::Ignored => {}
        }
    }

    fn on_disconnect(&mut self, connection_id: ConnectionId) {
        if let Some(identity) = self.registry.drop_connection(connection_id) {
            warn!("Team disconnected: {}", identity);
            self.end_match(EndReason::Disconnected(identity));
        }
    }

    fn on_registration_deadline(&mut self) {
        if self.phase() != MatchPhase::WaitingRegistration {
            debug!("Registration deadline passed after registration closed");
            return;
        }

        warn!(
            "Registration timeout. Missing teams: {}",
            self.state.missing_identities().join(", ")
        );
        self.end_match(EndReason::RegistrationTimeout);
    }

    fn on_tick(&mut self, now: Instant) {
        if self.phase() != MatchPhase::RoundInProgress {
            return;
        }
        self.expire_round(now);
    }

    /// Times the open round out if its deadline has passed with responses
    /// still missing. Returns true if it did.
    ///
    /// Every participant still pending gets a timeout recorded. Reaching the
    /// limit ends the match, otherwise the partial round is resolved and the
    /// next one starts.
    fn expire_round(&mut self, now: Instant) -> bool {
        let Some(missing) = self
            .barrier
            .as_mut()
            .and_then(|barrier| barrier.check_deadline(now))
        else {
            return false;
        };

        let max_timeouts = self.state.config().max_timeouts;
        let mut fatal = false;
        for identity in &missing {
            let count = self.state.record_timeout(identity);
            warn!(
                "Round {} timeout: no response from {} ({}/{})",
                self.state.current_round(),
                identity,
                count,
                max_timeouts
            );
            fatal |= count >= max_timeouts;
        }

        if fatal {
            self.end_match(EndReason::RoundTimeout);
        } else {
            self.finish_round(now);
        }
        true
    }

    /// Opens the next round, or ends the match once the ceiling is reached.
    fn start_round(&mut self, now: Instant) {
        let round = match self.state.advance_round() {
            Ok(round) => round,
            Err(MatchError::MaxRoundsReached(_)) => {
                self.end_match(EndReason::GameCompleted);
                return;
            }
            Err(e) => {
                error!("Cannot start round: {}", e);
                return;
            }
        };

        let deadline = now + self.state.config().round_timeout;
        self.state.set_round_deadline(deadline);
        self.barrier = Some(RoundBarrier::start(round, self.state.roster(), deadline));

        info!(
            "Starting round {}/{}",
            round,
            self.state.config().max_rounds
        );
        let failed = self.registry.broadcast(&Message::Inquiry { round });
        self.handle_send_failures(failed);
    }

    /// Resolves the closed round with whatever responses arrived and moves on.
    fn finish_round(&mut self, now: Instant) {
        let Some(barrier) = self.barrier.take() else {
            return;
        };

        self.state.apply_round_result(&barrier.into_responses());
        self.start_round(now);
    }

    fn end_match(&mut self, reason: EndReason) {
        if !self.state.end(reason.clone()) {
            return;
        }
        self.barrier = None;

        let total_rounds = self.state.current_round();
        info!("Game over: {} (after {} rounds)", reason, total_rounds);

        let unreachable = self.registry.broadcast_all(&Message::GameOver {
            reason: reason.to_string(),
            total_rounds,
        });
        if unreachable > 0 {
            debug!("{} connections missed the gameover notice", unreachable);
        }
        self.registry.close_all();
    }

    /// Peers that could not be reached count as disconnected.
    fn handle_send_failures(&mut self, failed: Vec<String>) {
        for identity in &failed {
            warn!("Failed to reach {}", identity);
            self.registry.remove(identity);
        }
        if let Some(identity) = failed.into_iter().next() {
            self.end_match(EndReason::Disconnected(identity));
        }
    }

    /// A connection may only act for the identity it registered.
    fn speaks_for(&self, connection_id: ConnectionId, identity: &str) -> bool {
        match self.registry.identity_of(connection_id) {
            Some(bound) if bound == identity => true,
            Some(bound) => {
                warn!(
                    "Connection registered as {} tried to act for {}",
                    bound, identity
                );
                false
            }
            None => {
                warn!("Message for {} from an unregistered connection", identity);
                false
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase() == MatchPhase::Ended
    }

    pub fn phase(&self) -> MatchPhase {
        self.state.phase()
    }

    pub fn current_round(&self) -> u32 {
        self.state.current_round()
    }

    pub fn round_deadline(&self) -> Option<Instant> {
        self.state.round_deadline()
    }

    pub fn end_reason(&self) -> Option<&EndReason> {
        self.state.end_reason()
    }

    pub fn participant(&self, identity: &str) -> Option<&Participant> {
        self.state.participant(identity)
    }

    pub fn config(&self) -> &MatchConfig {
        self.state.config()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn resolver_state(&self) -> &R::State {
        self.state.resolver_state()
    }

    /// Consumes the judge. A match that never ended is reported as shut down.
    pub fn into_outcome(self) -> MatchOutcome<R::State> {
        let reason = self
            .state
            .end_reason()
            .cloned()
            .unwrap_or(EndReason::Shutdown);
        MatchOutcome {
            reason,
            total_rounds: self.state.current_round(),
            state: self.state.into_resolver_state(),
        }
    }
}
