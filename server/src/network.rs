//! Server network layer handling TCP connections and match sequencing

use crate::config::MatchConfig;
use crate::error::ServerError;
use crate::judge::{Judge, JudgeEvent, MatchOutcome};
use crate::registry::{Connection, ConnectionId, Outbound};
use crate::resolver::{RoundResolver, TallyResolver};
use log::{debug, error, info, warn};
use shared::{encode, MessageDecoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};

const READ_BUFFER_SIZE: usize = 4096;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Judge server: accepts participants and runs a single match to completion
pub struct Server<R: RoundResolver = TallyResolver> {
    listener: Arc<TcpListener>,
    judge: Judge<R>,

    // Every task posts into this one queue; only `run` consumes it
    event_tx: mpsc::UnboundedSender<JudgeEvent>,
    event_rx: mpsc::UnboundedReceiver<JudgeEvent>,
}

impl Server<TallyResolver> {
    pub async fn bind(addr: &str, config: MatchConfig) -> Result<Self, ServerError> {
        Self::bind_with_resolver(addr, config, TallyResolver).await
    }
}

impl<R: RoundResolver> Server<R> {
    pub async fn bind_with_resolver(
        addr: &str,
        config: MatchConfig,
        resolver: R,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = TcpListener::bind(addr).await?;
        info!("Server started on {}", listener.local_addr()?);
        info!("Waiting for teams: {}", config.teams().join(", "));
        info!(
            "Registration timeout: {} seconds",
            config.registration_timeout.as_secs_f64()
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Arc::new(listener),
            judge: Judge::with_resolver(config, resolver),
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for injecting events from outside, e.g. a shutdown on Ctrl+C
    pub fn event_sender(&self) -> mpsc::UnboundedSender<JudgeEvent> {
        self.event_tx.clone()
    }

    /// Spawns task that admits new connections and owns their I/O tasks.
    ///
    /// Once `stop` fires, readers are aborted and writers get a grace period
    /// to flush whatever is still queued, such as the final `gameover`.
    fn spawn_acceptor(&self, mut stop: oneshot::Receiver<()>) -> JoinHandle<()> {
        let listener = Arc::clone(&self.listener);
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let mut next_id: ConnectionId = 1;
            let mut readers = JoinSet::new();
            let mut writers = JoinSet::new();

            loop {
                tokio::select! {
                    _ = &mut stop => break,

                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            let connection_id = next_id;
                            next_id += 1;

                            if let Err(e) = stream.set_nodelay(true) {
                                debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                            }

                            let (reader, writer) = stream.into_split();
                            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                            writers.spawn(write_connection(connection_id, writer, outbound_rx));

                            // Must reach the sequencer before anything the reader decodes
                            let connection = Connection::new(connection_id, addr, outbound_tx);
                            if event_tx.send(JudgeEvent::Connected { connection }).is_err() {
                                break;
                            }

                            readers.spawn(read_connection(connection_id, reader, event_tx.clone()));
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    },
                }
            }

            readers.abort_all();
            let drained = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, async {
                while writers.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("Gave up flushing {} connections", writers.len());
            }
        })
    }

    /// Spawns the one-shot registration deadline. The judge decides whether
    /// it still matters when it fires.
    fn spawn_registration_timer(&self) -> JoinHandle<()> {
        let event_tx = self.event_tx.clone();
        let timeout = self.judge.config().registration_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = event_tx.send(JudgeEvent::RegistrationDeadline);
        })
    }

    /// Runs the match until it ends and returns how it ended
    pub async fn run(mut self) -> Result<MatchOutcome<R::State>, ServerError> {
        let (stop_tx, stop_rx) = oneshot::channel();
        let acceptor = self.spawn_acceptor(stop_rx);
        let registration_timer = self.spawn_registration_timer();

        let mut tick_interval = interval(self.judge.config().tick_interval());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !self.judge.is_finished() {
            tokio::select! {
                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.judge.handle(event, Instant::now()),
                        None => self.judge.handle(JudgeEvent::Shutdown, Instant::now()),
                    }
                },

                _ = tick_interval.tick() => {
                    self.judge.handle(JudgeEvent::Tick, Instant::now());
                },
            }
        }

        registration_timer.abort();

        // Connections still waiting in the queue are dropped along with their
        // outbound senders, which lets their writers finish
        self.event_rx.close();
        while self.event_rx.try_recv().is_ok() {}

        let _ = stop_tx.send(());
        if let Err(e) = acceptor.await {
            error!("Connection acceptor failed: {}", e);
        }

        Ok(self.judge.into_outcome())
    }
}

/// Decodes everything a peer sends and forwards it to the sequencer.
/// Ends with exactly one `Disconnected` event.
async fn read_connection(
    connection_id: ConnectionId,
    mut reader: OwnedReadHalf,
    event_tx: mpsc::UnboundedSender<JudgeEvent>,
) {
    let mut decoder = MessageDecoder::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(len) => {
                for result in decoder.feed(&buffer[..len]) {
                    let event = match result {
                        Ok(message) => JudgeEvent::MessageReceived {
                            connection_id,
                            message,
                        },
                        Err(e) => JudgeEvent::Malformed {
                            connection_id,
                            error: e.to_string(),
                        },
                    };
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!("Error reading from connection {}: {}", connection_id, e);
                break;
            }
        }
    }

    let _ = event_tx.send(JudgeEvent::Disconnected { connection_id });
}

/// Drains a connection's outbound queue into its socket
async fn write_connection(
    connection_id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = outbound_rx.recv().await {
        match outbound {
            Outbound::Message(message) => {
                let bytes = match encode(&message) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("Failed to encode {}: {}", message.kind(), e);
                        continue;
                    }
                };
                if let Err(e) = writer.write_all(&bytes).await {
                    warn!(
                        "Failed to send {} to connection {}: {}",
                        message.kind(),
                        connection_id,
                        e
                    );
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Error closing connection {}: {}", connection_id, e);
    }
}
