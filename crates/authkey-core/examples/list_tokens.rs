//! authkey token listing tool
//!
//! Waits for an authenticator to be plugged in, prints its stored tokens and
//! reports connection/PIN events as they happen.
//!
//! Usage:
//!   cargo run --example list_tokens -- [OPTIONS]
//!
//! Options:
//!   --config FILE     JSON client configuration (give before --baud)
//!   --baud RATE       Baud rate (default: 115200)
//!   --ports           List serial ports and exit
//!
//! Set RUST_LOG=authkey_core=debug to trace the serial traffic.

use anyhow::{bail, Context, Result};
use authkey_core::protocol::{list_ports, ProtocolEventKind};
use authkey_core::{ClientConfig, DeviceClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let path = args.get(i).context("--config needs a file")?;
                config = ClientConfig::from_file(path)?;
            }
            "--baud" | "-b" => {
                i += 1;
                config.baud_rate = args
                    .get(i)
                    .context("--baud needs a rate")?
                    .parse()
                    .context("invalid baud rate")?;
            }
            "--ports" => {
                for port in list_ports() {
                    match (port.vid, port.pid) {
                        (Some(vid), Some(pid)) => {
                            println!("{}  {:04x}:{:04x}", port.name, vid, pid)
                        }
                        _ => println!("{}", port.name),
                    }
                }
                return Ok(());
            }
            "--help" | "-h" => {
                println!("Usage: list_tokens [--config FILE] [--baud RATE] [--ports]");
                return Ok(());
            }
            other => bail!("unknown argument: {}", other),
        }
        i += 1;
    }

    let mut client = DeviceClient::new(config)?;
    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.kind {
                ProtocolEventKind::Connecting => println!("Waiting for authenticator..."),
                ProtocolEventKind::Connected => println!("Connected"),
                ProtocolEventKind::PinRequested => println!("Enter your PIN on the device"),
                ProtocolEventKind::Closed => println!("Closed"),
            }
        }
    });

    client.wait_for_app().await?;
    let tokens = client.list_tokens().await?;
    if tokens.is_empty() {
        println!("No tokens stored");
    }
    for (n, token) in tokens.iter().enumerate() {
        let fields: Vec<String> = token
            .fields()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!("{:3}. {}", n + 1, fields.join("  "));
    }

    client.close().await;
    Ok(())
}
