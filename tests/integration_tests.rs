//! Integration tests for the judge server over real TCP connections
//!
//! Each test binds a server to an ephemeral port and drives it with raw
//! protocol peers or the real client library.

use client::network::{Client, ClientConfig};
use client::strategy::RandomStrategy;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use server::config::MatchConfig;
use server::error::ServerError;
use server::judge::{JudgeEvent, MatchOutcome};
use server::match_state::EndReason;
use server::network::Server;
use server::resolver::Tally;
use shared::{encode, Message, MessageDecoder};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

type ServerHandle = JoinHandle<Result<MatchOutcome<Tally>, ServerError>>;

fn two_team_config() -> MatchConfig {
    MatchConfig::from_team_list("T1,T2")
        .unwrap()
        .with_round_timeout(Duration::from_secs(2))
        .with_registration_timeout(Duration::from_secs(10))
}

async fn start_server(config: MatchConfig) -> (SocketAddr, ServerHandle) {
    let server = Server::bind("127.0.0.1:0", config).await.unwrap();
    let addr = server.local_addr().unwrap();
    (addr, tokio::spawn(server.run()))
}

async fn finish(handle: ServerHandle) -> MatchOutcome<Tally> {
    timeout(WAIT, handle)
        .await
        .expect("server did not finish")
        .unwrap()
        .unwrap()
}

/// Raw protocol peer speaking directly over a socket
struct Peer {
    identity: String,
    stream: TcpStream,
    decoder: MessageDecoder,
    inbox: VecDeque<Message>,
}

impl Peer {
    async fn connect(addr: SocketAddr, identity: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        stream.set_nodelay(true).unwrap();
        Peer {
            identity: identity.to_string(),
            stream,
            decoder: MessageDecoder::new(),
            inbox: VecDeque::new(),
        }
    }

    async fn send(&mut self, message: &Message) {
        self.send_raw(&encode(message).unwrap()).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    async fn register(&mut self) {
        let message = Message::Register {
            identity: self.identity.clone(),
            display_name: format!("Team {}", self.identity),
            team_name: "A".to_string(),
        };
        self.send(&message).await;
    }

    async fn ready(&mut self) {
        let message = Message::GameReady {
            identity: self.identity.clone(),
        };
        self.send(&message).await;
    }

    async fn respond(&mut self, round: u32) {
        let message = Message::Response {
            identity: self.identity.clone(),
            round,
            data: json!({"move": "up", "score": round}),
        };
        self.send(&message).await;
    }

    /// Next message from the server, or `None` once the connection closed
    async fn try_recv(&mut self) -> Option<Message> {
        let mut buffer = [0u8; 4096];
        loop {
            if let Some(message) = self.inbox.pop_front() {
                return Some(message);
            }

            let len = timeout(WAIT, self.stream.read(&mut buffer))
                .await
                .expect("timed out waiting for the server")
                .unwrap_or(0);
            if len == 0 {
                return None;
            }

            for result in self.decoder.feed(&buffer[..len]) {
                self.inbox.push_back(result.unwrap());
            }
        }
    }

    async fn recv(&mut self) -> Message {
        self.try_recv().await.expect("connection closed")
    }

    /// Reads until the server closes the connection and returns the gameover
    async fn recv_gameover(&mut self) -> (String, u32) {
        let mut gameover = None;
        while let Some(message) = self.try_recv().await {
            if let Message::GameOver {
                reason,
                total_rounds,
            } = message
            {
                assert!(gameover.is_none(), "more than one gameover");
                gameover = Some((reason, total_rounds));
            }
        }
        gameover.expect("no gameover received")
    }
}

/// Registers both peers and brings the match to round 1
async fn start_match(addr: SocketAddr, max_rounds: u32) -> (Peer, Peer) {
    let mut t1 = Peer::connect(addr, "T1").await;
    let mut t2 = Peer::connect(addr, "T2").await;

    t1.register().await;
    t2.register().await;

    for peer in [&mut t1, &mut t2] {
        assert_eq!(peer.recv().await, Message::GameStart { max_rounds });
    }

    t1.ready().await;
    t2.ready().await;

    for peer in [&mut t1, &mut t2] {
        assert_eq!(peer.recv().await, Message::Inquiry { round: 1 });
    }

    (t1, t2)
}

mod match_flow {
    use super::*;

    #[tokio::test]
    async fn two_rounds_complete() {
        let (addr, handle) = start_server(two_team_config().with_max_rounds(2)).await;
        let (mut t1, mut t2) = start_match(addr, 2).await;

        t1.respond(1).await;
        t2.respond(1).await;
        for peer in [&mut t1, &mut t2] {
            assert_eq!(peer.recv().await, Message::Inquiry { round: 2 });
        }

        t1.respond(2).await;
        t2.respond(2).await;

        for peer in [&mut t1, &mut t2] {
            assert_eq!(
                peer.recv_gameover().await,
                ("Game completed".to_string(), 2)
            );
        }

        let outcome = finish(handle).await;
        assert_eq!(outcome.reason, EndReason::GameCompleted);
        assert_eq!(outcome.total_rounds, 2);
        assert_eq!(outcome.state.rounds_resolved, 2);
        assert_eq!(outcome.state.submitted.get("T1"), Some(&2));
        assert_eq!(outcome.state.submitted.get("T2"), Some(&2));
        assert_eq!(
            outcome.state.last_moves.get("T2"),
            Some(&json!({"move": "up", "score": 2}))
        );
    }

    #[tokio::test]
    async fn duplicate_registration_is_ignored() {
        let (addr, handle) = start_server(two_team_config().with_max_rounds(1)).await;

        let mut t1 = Peer::connect(addr, "T1").await;
        let mut imposter = Peer::connect(addr, "T1").await;
        t1.register().await;
        sleep(Duration::from_millis(50)).await;
        imposter.register().await;

        let mut t2 = Peer::connect(addr, "T2").await;
        t2.register().await;

        assert_eq!(t1.recv().await, Message::GameStart { max_rounds: 1 });
        assert_eq!(t2.recv().await, Message::GameStart { max_rounds: 1 });

        t1.ready().await;
        t2.ready().await;
        t1.recv().await;
        t2.recv().await;
        t1.respond(1).await;
        t2.respond(1).await;

        assert_eq!(t1.recv_gameover().await, ("Game completed".to_string(), 1));

        // The unbound connection only ever hears the final notice
        assert_eq!(
            imposter.recv_gameover().await,
            ("Game completed".to_string(), 1)
        );

        let outcome = finish(handle).await;
        assert_eq!(outcome.reason, EndReason::GameCompleted);
    }

    #[tokio::test]
    async fn late_response_does_not_count_for_next_round() {
        let config = two_team_config()
            .with_max_rounds(2)
            .with_round_timeout(Duration::from_millis(200));
        let (addr, handle) = start_server(config).await;
        let (mut t1, mut t2) = start_match(addr, 2).await;

        // T2 misses round 1 and answers it during round 2
        t1.respond(1).await;
        assert_eq!(t1.recv().await, Message::Inquiry { round: 2 });
        assert_eq!(t2.recv().await, Message::Inquiry { round: 2 });
        t2.respond(1).await;
        t1.respond(2).await;

        assert_eq!(t1.recv_gameover().await, ("Game completed".to_string(), 2));

        let outcome = finish(handle).await;
        assert_eq!(outcome.state.submitted.get("T1"), Some(&2));
        assert_eq!(outcome.state.submitted.get("T2"), None);
        assert_eq!(outcome.state.missed.get("T2"), Some(&2));
    }
}

mod termination {
    use super::*;

    #[tokio::test]
    async fn disconnect_mid_round_ends_match() {
        let (addr, handle) = start_server(two_team_config()).await;
        let (mut t1, t2) = start_match(addr, 500).await;

        drop(t2);

        assert_eq!(
            t1.recv_gameover().await,
            ("Team T2 disconnected".to_string(), 1)
        );

        let outcome = finish(handle).await;
        assert_eq!(outcome.reason, EndReason::Disconnected("T2".to_string()));
        assert_eq!(outcome.total_rounds, 1);
    }

    #[tokio::test]
    async fn registration_timeout_ends_match() {
        let config = two_team_config().with_registration_timeout(Duration::from_millis(200));
        let (addr, handle) = start_server(config).await;

        let mut t1 = Peer::connect(addr, "T1").await;
        t1.register().await;

        assert_eq!(
            t1.recv_gameover().await,
            ("Registration timeout".to_string(), 0)
        );

        let outcome = finish(handle).await;
        assert_eq!(outcome.reason, EndReason::RegistrationTimeout);
        assert_eq!(outcome.total_rounds, 0);
        assert_eq!(outcome.state.rounds_resolved, 0);
    }

    #[tokio::test]
    async fn repeated_round_timeouts_end_match() {
        let config = two_team_config()
            .with_round_timeout(Duration::from_millis(50))
            .with_max_timeouts(3);
        let (addr, handle) = start_server(config).await;
        let (mut t1, mut t2) = start_match(addr, 500).await;

        // T1 answers everything, T2 stays silent
        t1.respond(1).await;
        let gameover = loop {
            match t1.recv().await {
                Message::Inquiry { round } => t1.respond(round).await,
                Message::GameOver {
                    reason,
                    total_rounds,
                } => break (reason, total_rounds),
                other => panic!("unexpected {:?}", other),
            }
        };
        assert_eq!(gameover, ("Round timeout".to_string(), 3));
        assert_eq!(t2.recv_gameover().await, ("Round timeout".to_string(), 3));

        let outcome = finish(handle).await;
        assert_eq!(outcome.reason, EndReason::RoundTimeout);
        assert_eq!(outcome.total_rounds, 3);
        // The fatal round is never resolved
        assert_eq!(outcome.state.rounds_resolved, 2);
        assert_eq!(outcome.state.missed.get("T2"), Some(&2));
    }

    #[tokio::test]
    async fn shutdown_notifies_connections() {
        let server = Server::bind("127.0.0.1:0", two_team_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let events = server.event_sender();
        let handle = tokio::spawn(server.run());

        let mut t1 = Peer::connect(addr, "T1").await;
        t1.register().await;
        sleep(Duration::from_millis(50)).await;

        events.send(JudgeEvent::Shutdown).unwrap();

        assert_eq!(t1.recv_gameover().await, ("Server shutdown".to_string(), 0));
        assert_eq!(finish(handle).await.reason, EndReason::Shutdown);
    }
}

mod robustness {
    use super::*;

    #[tokio::test]
    async fn malformed_input_is_not_fatal() {
        let (addr, handle) = start_server(two_team_config().with_max_rounds(1)).await;

        let mut t1 = Peer::connect(addr, "T1").await;
        t1.send_raw(b"this is not json\n").await;
        sleep(Duration::from_millis(100)).await;

        // A well-formed object of unknown type is skipped, its neighbour is not
        let mut bytes = b"{\"type\":\"bogus\",\"identity\":\"T1\"}".to_vec();
        bytes.extend(encode(&Message::Register {
            identity: "T1".to_string(),
            display_name: "one".to_string(),
            team_name: "A".to_string(),
        })
        .unwrap());
        t1.send_raw(&bytes).await;

        // Server-only kinds from a participant are dropped
        t1.send(&Message::Inquiry { round: 7 }).await;

        let mut t2 = Peer::connect(addr, "T2").await;
        t2.register().await;

        assert_eq!(t1.recv().await, Message::GameStart { max_rounds: 1 });
        assert_eq!(t2.recv().await, Message::GameStart { max_rounds: 1 });

        t1.ready().await;
        t2.ready().await;
        assert_eq!(t1.recv().await, Message::Inquiry { round: 1 });
        assert_eq!(t2.recv().await, Message::Inquiry { round: 1 });
        t1.respond(1).await;
        t2.respond(1).await;

        assert_eq!(t1.recv_gameover().await, ("Game completed".to_string(), 1));
        assert_eq!(finish(handle).await.reason, EndReason::GameCompleted);
    }

    #[tokio::test]
    async fn identity_spoofing_is_ignored() {
        let config = two_team_config()
            .with_max_rounds(1)
            .with_round_timeout(Duration::from_millis(200));
        let (addr, handle) = start_server(config).await;
        let (mut t1, mut t2) = start_match(addr, 1).await;

        // T1 tries to answer for T2 as well
        t1.respond(1).await;
        t1.send(&Message::Response {
            identity: "T2".to_string(),
            round: 1,
            data: json!({"move": "down"}),
        })
        .await;

        assert_eq!(t1.recv_gameover().await, ("Game completed".to_string(), 1));
        assert_eq!(t2.recv_gameover().await, ("Game completed".to_string(), 1));

        let outcome = finish(handle).await;
        assert_eq!(outcome.state.submitted.get("T2"), None);
        assert_eq!(outcome.state.missed.get("T2"), Some(&1));
    }
}

mod clients {
    use super::*;

    #[tokio::test]
    async fn full_match_with_random_clients() {
        let (addr, handle) = start_server(two_team_config().with_max_rounds(5)).await;

        let mut players = Vec::new();
        for (identity, seed) in [("T1", 1), ("T2", 2)] {
            let config = ClientConfig::new(&addr.to_string(), identity, "A");
            let strategy = RandomStrategy::new(StdRng::seed_from_u64(seed));
            let client = Client::connect_with_strategy(config, strategy)
                .await
                .unwrap();
            players.push(tokio::spawn(client.run()));
        }

        for player in players {
            let summary = timeout(WAIT, player).await.unwrap().unwrap().unwrap();
            assert_eq!(summary.reason.as_deref(), Some("Game completed"));
            assert_eq!(summary.total_rounds, 5);
            assert_eq!(summary.rounds_answered, 5);
        }

        let outcome = finish(handle).await;
        assert_eq!(outcome.reason, EndReason::GameCompleted);
        assert_eq!(outcome.state.submitted.get("T1"), Some(&5));
        assert!(outcome.state.missed.is_empty());
        assert!(outcome.state.last_moves["T1"]["move"].is_string());
    }
}
