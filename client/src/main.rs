use clap::Parser;
use client::network::{Client, ClientConfig, ClientResult};
use env_logger::Env;
use log::info;
use shared::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about = "Random-move match participant", long_about = None)]
struct Args {
    /// Judge server address
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Judge server port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Identity to register with, must be on the judge's team list
    #[arg(short = 'i', long)]
    id: String,

    /// Team name reported at registration
    #[arg(long, default_value = "A")]
    team_name: String,

    /// Display name, defaults to the identity
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> ClientResult<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let server_addr = format!("{}:{}", args.server, args.port);
    let mut config = ClientConfig::new(&server_addr, &args.id, &args.team_name);
    if let Some(name) = &args.name {
        config = config.with_display_name(name);
    }

    let client = Client::connect(config).await?;
    let summary = client.run().await?;

    match summary.reason {
        Some(reason) => info!(
            "Finished: {} ({} rounds, answered {})",
            reason, summary.total_rounds, summary.rounds_answered
        ),
        None => info!(
            "Connection closed after answering {} rounds",
            summary.rounds_answered
        ),
    }

    Ok(())
}
