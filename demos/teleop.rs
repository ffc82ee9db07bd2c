// Keyboard teleop: WASD drive, space stop, M toggle mode, 1/2/3 speed, Q quit
//
// Sends command datagrams to the car's port 50001 and prints the status
// reports the car sends back to port 50002.

use std::net::Ipv4Addr;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use serde_json::json;
use tokio::net::UdpSocket;
use tracing::{info, warn};

use minicar_udp_runtime::config::{COMMAND_PORT, TELEMETRY_PORT};

/// Keyboard teleop client for the car runtime
#[derive(Parser)]
struct Args {
    /// Car IP address
    #[arg(default_value = "192.168.1.1")]
    car: Ipv4Addr,
}

const SPEEDS: [&str; 3] = ["low", "medium", "high"];
const MODES: [&str; 2] = ["step", "alway"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.connect((args.car, COMMAND_PORT)).await?;

    // Status reports arrive on the fixed telemetry port
    tokio::spawn(print_status());

    info!("Controls: WASD=drive, SPACE=stop, M=mode, 1/2/3=speed, Q=quit");

    enable_raw_mode()?;
    let result = run_teleop(&socket).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(socket: &UdpSocket) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 1; // medium
    let mut mode_idx: usize = 0; // step

    loop {
        // Poll for key with 20ms timeout
        if !event::poll(Duration::from_millis(20))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press && kind != KeyEventKind::Repeat {
            continue;
        }

        let cmd = match code {
            KeyCode::Char('w') => Some("forward"),
            KeyCode::Char('s') => Some("backward"),
            KeyCode::Char('a') => Some("left"),
            KeyCode::Char('d') => Some("right"),
            KeyCode::Char(' ') => Some("stop"),
            KeyCode::Char('m') => {
                mode_idx = (mode_idx + 1) % MODES.len();
                info!("Mode: {}", MODES[mode_idx]);
                None
            }
            KeyCode::Char(c @ '1'..='3') => {
                speed_idx = c as usize - '1' as usize;
                info!("Speed: {}", SPEEDS[speed_idx]);
                None
            }
            KeyCode::Char('q') | KeyCode::Esc => break,
            _ => None,
        };

        let Some(cmd) = cmd else {
            continue;
        };
        let msg = json!({
            "cmd": cmd,
            "mode": MODES[mode_idx],
            "speed": SPEEDS[speed_idx],
        });
        socket.send(msg.to_string().as_bytes()).await?;
        info!("Sent: {}", cmd);
    }

    Ok(())
}

async fn print_status() {
    let socket = match UdpSocket::bind(("0.0.0.0", TELEMETRY_PORT)).await {
        Ok(s) => s,
        Err(e) => {
            warn!("cannot listen for status on udp/{}: {}", TELEMETRY_PORT, e);
            return;
        }
    };

    let mut buf = [0u8; 256];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, _)) => {
                info!("Status: {}", String::from_utf8_lossy(&buf[..len]));
            }
            Err(e) => {
                warn!("status recv failed: {}", e);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}
