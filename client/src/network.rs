use crate::strategy::{RandomStrategy, Strategy};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use shared::{encode, Message, MessageDecoder};
use std::io::ErrorKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const READ_BUFFER_SIZE: usize = 4096;

pub type ClientResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub identity: String,
    pub display_name: String,
    pub team_name: String,
}

impl ClientConfig {
    /// Uses the identity as display name.
    pub fn new(server_addr: &str, identity: &str, team_name: &str) -> Self {
        Self {
            server_addr: server_addr.to_string(),
            identity: identity.to_string(),
            display_name: identity.to_string(),
            team_name: team_name.to_string(),
        }
    }

    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }
}

/// How the client's match ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSummary {
    /// Reason from `gameover`, or `None` if the server just closed the connection
    pub reason: Option<String>,
    pub total_rounds: u32,
    pub rounds_answered: u32,
}

/// What to do after handling one message from the server
#[derive(Debug, PartialEq)]
enum Step {
    Reply(Message),
    Continue,
    Finished(MatchSummary),
}

pub struct Client<S: Strategy = RandomStrategy<StdRng>> {
    stream: TcpStream,
    config: ClientConfig,
    strategy: S,
    decoder: MessageDecoder,
    max_rounds: Option<u32>,
    rounds_answered: u32,
}

impl Client<RandomStrategy<StdRng>> {
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        Self::connect_with_strategy(config, RandomStrategy::from_entropy()).await
    }
}

impl<S: Strategy> Client<S> {
    pub async fn connect_with_strategy(config: ClientConfig, strategy: S) -> ClientResult<Self> {
        info!("Connecting to {}...", config.server_addr);
        let stream = TcpStream::connect(&config.server_addr).await?;
        stream.set_nodelay(true)?;

        Ok(Client {
            stream,
            config,
            strategy,
            decoder: MessageDecoder::new(),
            max_rounds: None,
            rounds_answered: 0,
        })
    }

    /// Returns `false` if the server has already hung up.
    async fn send(&mut self, message: &Message) -> ClientResult<bool> {
        let bytes = encode(message)?;
        match self.stream.write_all(&bytes).await {
            Ok(()) => Ok(true),
            Err(e) if is_disconnect(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn closed_summary(&self) -> MatchSummary {
        info!("Server closed the connection");
        MatchSummary {
            reason: None,
            total_rounds: self.rounds_answered,
            rounds_answered: self.rounds_answered,
        }
    }

    /// Registers and plays until the server ends the match.
    pub async fn run(mut self) -> ClientResult<MatchSummary> {
        let register = Message::Register {
            identity: self.config.identity.clone(),
            display_name: self.config.display_name.clone(),
            team_name: self.config.team_name.clone(),
        };
        if !self.send(&register).await? {
            return Ok(self.closed_summary());
        }
        info!("Registered as {}", self.config.identity);

        let mut buffer = [0u8; READ_BUFFER_SIZE];
        loop {
            let len = match self.stream.read(&mut buffer).await {
                Ok(len) => len,
                Err(e) if is_disconnect(&e) => 0,
                Err(e) => return Err(e.into()),
            };
            if len == 0 {
                return Ok(self.closed_summary());
            }

            for result in self.decoder.feed(&buffer[..len]) {
                let message = match result {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Ignoring malformed data from server: {}", e);
                        continue;
                    }
                };

                match self.handle_message(message) {
                    Step::Reply(reply) => {
                        if !self.send(&reply).await? {
                            return Ok(self.closed_summary());
                        }
                    }
                    Step::Continue => {}
                    Step::Finished(summary) => return Ok(summary),
                }
            }
        }
    }

    fn handle_message(&mut self, message: Message) -> Step {
        match message {
            Message::GameStart { max_rounds } => {
                info!("Game starting, up to {} rounds", max_rounds);
                self.max_rounds = Some(max_rounds);
                Step::Reply(Message::GameReady {
                    identity: self.config.identity.clone(),
                })
            }

            Message::Inquiry { round } => {
                let data = self.strategy.next_move(round);
                debug!("Round {}: answering {}", round, data);
                self.rounds_answered += 1;
                Step::Reply(Message::Response {
                    identity: self.config.identity.clone(),
                    round,
                    data,
                })
            }

            Message::GameOver {
                reason,
                total_rounds,
            } => {
                info!("Game over: {} after {} rounds", reason, total_rounds);
                Step::Finished(MatchSummary {
                    reason: Some(reason),
                    total_rounds,
                    rounds_answered: self.rounds_answered,
                })
            }

            other => {
                warn!("Unexpected {} message from server", other.kind());
                Step::Continue
            }
        }
    }

    /// Round ceiling announced in `gamestart`, once received
    pub fn max_rounds(&self) -> Option<u32> {
        self.max_rounds
    }
}

/// A reset or broken pipe after the match is just the server going away.
fn is_disconnect(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}
