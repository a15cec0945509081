//! Periodic demo caller: drives one gateway call on a fixed interval and
//! logs the outcome.

use std::time::Duration;

use clap::Parser;
use outgate::{Gateway, SwapiService};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "swapi-demo", about = "Fetch a Star Wars character on a timer")]
struct Args {
    /// Base url of the Star Wars API.
    #[arg(long, env = "SWAPI_BASE_URL", default_value = "https://swapi.dev/api")]
    base_url: String,

    /// Character id to fetch.
    #[arg(long, default_value_t = 2)]
    person: u32,

    /// Seconds between calls.
    #[arg(long, default_value_t = 5)]
    interval_secs: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let service = SwapiService::new(Gateway::new(), args.base_url.clone());
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));

    info!(
        base_url = %args.base_url,
        person = args.person,
        interval_secs = args.interval_secs,
        "starting scheduled gateway caller"
    );

    loop {
        ticker.tick().await;
        match service.person(args.person).await {
            Ok(person) => info!(name = %person.name, "fetched person"),
            Err(error) => warn!(code = error.code().as_str(), error = %error, "call failed"),
        }
    }
}
