//! # Match Participant Library
//!
//! A minimal protocol peer for the match judge. It connects over TCP,
//! registers its identity, reports ready once the judge announces the game,
//! answers every inquiry through a [`strategy::Strategy`] and stops when the
//! judge sends `gameover` or closes the connection.
//!
//! The shipped [`strategy::RandomStrategy`] answers with a random direction
//! and score. Anything implementing `Strategy` can be plugged in instead; the
//! judge treats the payload as opaque JSON.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = ClientConfig::new("127.0.0.1:6001", "team1", "A");
//!     let client = Client::connect(config).await?;
//!
//!     let summary = client.run().await?;
//!     println!("{:?} after {} rounds", summary.reason, summary.total_rounds);
//!
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod strategy;
