//! Match and server configuration.

use crate::error::ConfigError;
use shared::{
    DEFAULT_MAX_ROUNDS, DEFAULT_MAX_TIMEOUTS, DEFAULT_REGISTRATION_TIMEOUT_SECS,
    DEFAULT_ROUND_TIMEOUT_MS,
};
use std::collections::HashSet;
use std::time::Duration;

const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Rules of a single match. Validated on construction and immutable after.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    teams: Vec<String>,
    pub registration_timeout: Duration,
    pub round_timeout: Duration,
    pub max_rounds: u32,
    /// Cumulative round timeouts after which a participant forfeits the match
    pub max_timeouts: u32,
}

impl MatchConfig {
    /// Creates a configuration with default timings for the given roster.
    ///
    /// The roster order matters: the first identity plays the left side.
    pub fn new(teams: Vec<String>) -> Result<Self, ConfigError> {
        if teams.len() < 2 {
            return Err(ConfigError::TooFewTeams(teams.len()));
        }

        let mut seen = HashSet::new();
        for team in &teams {
            if team.is_empty() {
                return Err(ConfigError::EmptyTeam);
            }
            if !seen.insert(team.as_str()) {
                return Err(ConfigError::DuplicateTeam(team.clone()));
            }
        }

        Ok(Self {
            teams,
            registration_timeout: Duration::from_secs(DEFAULT_REGISTRATION_TIMEOUT_SECS),
            round_timeout: Duration::from_millis(DEFAULT_ROUND_TIMEOUT_MS),
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
        })
    }

    /// Parses a comma-separated identity list such as `"team1,team2"`.
    pub fn from_team_list(list: &str) -> Result<Self, ConfigError> {
        let teams = list
            .split(',')
            .map(|team| team.trim().to_string())
            .collect::<Vec<_>>();
        Self::new(teams)
    }

    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = timeout;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_max_timeouts(mut self, max_timeouts: u32) -> Self {
        self.max_timeouts = max_timeouts;
        self
    }

    /// Checks the numeric limits, which the builder methods do not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_rounds",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_timeouts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_timeouts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.round_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "round_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn teams(&self) -> &[String] {
        &self.teams
    }

    /// Interval at which the sequencer re-evaluates round deadlines.
    ///
    /// A fifth of the round timeout with a 10ms floor, but never longer than
    /// the round timeout itself.
    pub fn tick_interval(&self) -> Duration {
        let floor = MIN_TICK_INTERVAL.min(self.round_timeout);
        (self.round_timeout / 5).max(floor)
    }
}

/// Everything the server binary needs to run one match.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub match_config: MatchConfig,
}

impl ServerConfig {
    pub fn new(host: &str, port: u16, match_config: MatchConfig) -> Self {
        Self {
            bind_addr: format!("{}:{}", host, port),
            match_config,
        }
    }
}
