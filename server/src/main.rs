use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use server::config::{MatchConfig, ServerConfig};
use server::judge::JudgeEvent;
use server::network::Server;
use shared::{
    DEFAULT_MAX_ROUNDS, DEFAULT_MAX_TIMEOUTS, DEFAULT_PORT, DEFAULT_REGISTRATION_TIMEOUT_SECS,
    DEFAULT_ROUND_TIMEOUT_MS,
};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Turn-based match judge", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short = 'l', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Registration timeout in seconds
    #[arg(short = 'c', long, default_value_t = DEFAULT_REGISTRATION_TIMEOUT_SECS)]
    timeout: u64,

    /// Comma-separated identities expected to register, e.g. "team1,team2"
    #[arg(short = 'C', long)]
    teams: String,

    /// Number of rounds after which the match is complete
    #[arg(long, default_value_t = DEFAULT_MAX_ROUNDS)]
    max_rounds: u32,

    /// Deadline for collecting one round's responses
    #[arg(long, default_value_t = DEFAULT_ROUND_TIMEOUT_MS)]
    round_timeout_ms: u64,

    /// Missed rounds after which a participant forfeits
    #[arg(long, default_value_t = DEFAULT_MAX_TIMEOUTS)]
    max_timeouts: u32,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig, server::error::ConfigError> {
        let match_config = MatchConfig::from_team_list(&self.teams)?
            .with_registration_timeout(Duration::from_secs(self.timeout))
            .with_round_timeout(Duration::from_millis(self.round_timeout_ms))
            .with_max_rounds(self.max_rounds)
            .with_max_timeouts(self.max_timeouts);
        match_config.validate()?;
        Ok(ServerConfig::new(&self.host, self.port, match_config))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = match args.server_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let server = match Server::bind(&config.bind_addr, config.match_config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server on {}: {}", config.bind_addr, e);
            return ExitCode::FAILURE;
        }
    };

    let events = server.event_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            let _ = events.send(JudgeEvent::Shutdown);
        }
    });

    match server.run().await {
        Ok(outcome) => {
            info!(
                "Match finished: {} after {} rounds",
                outcome.reason, outcome.total_rounds
            );
            match serde_json::to_string(&outcome.state) {
                Ok(tally) => info!("Final tally: {}", tally),
                Err(e) => warn!("Could not serialize final tally: {}", e),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
