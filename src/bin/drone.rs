//! drone: worker agent answering the master's load surveys.

use std::time::Duration;

use clap::Parser;

use overlord::drone::{DroneError, DroneRespondent, SystemLoad};

#[derive(Parser, Debug)]
#[command(name = "drone", about = "Reports this worker's load to the overlord master")]
struct Cli {
    /// Master survey address, `host:port`.
    #[arg(long, default_value = "localhost:8000")]
    master: String,

    /// This worker's private address, as the provider reports it.
    #[arg(long)]
    address: String,

    /// Delay between READY announcements.
    #[arg(long = "hellointerval", default_value = "5s", value_parser = humantime::parse_duration)]
    hello_interval: Duration,
}

fn main() -> Result<(), DroneError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut drone = DroneRespondent::connect(
        &format!("tcp://{}", cli.master),
        cli.address,
        Box::new(SystemLoad::new()),
    )?
    .with_hello_interval(cli.hello_interval.max(Duration::from_millis(100)));
    drone.run()
}
