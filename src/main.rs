use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use minicar_udp_runtime::config;
use minicar_udp_runtime::runtime::{self, RunOptions};

/// UDP-controlled differential-drive car runtime
#[derive(Parser)]
struct Args {
    /// Run without motors attached, logging actuation instead
    #[arg(long)]
    simulate: bool,

    /// Sysfs PWM chip directory
    #[arg(long, default_value = config::PWM_CHIP)]
    pwm_chip: PathBuf,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let opts = RunOptions {
        simulate: args.simulate,
        pwm_chip: args.pwm_chip,
    };

    if let Err(e) = runtime::run(opts).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
