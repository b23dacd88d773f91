use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use uartlink::infrastructure::logging;
use uartlink::{BtleplugPlatform, LinkConfig, LinkController, SettingsService};

/// Link controller for a single BLE UART peripheral.
///
/// Reads lines from stdin and transmits them to the target characteristic.
/// `/switch` toggles the connection, `/pause` and `/resume` control the
/// transmitter, `/status` prints the link state, `/quit` exits.
#[derive(Parser, Debug)]
#[command(name = "uartlink", version)]
struct Cli {
    /// Settings file to use instead of the platform config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the target hardware address from settings.
    #[arg(long)]
    address: Option<String>,

    /// Start scanning immediately instead of waiting for /switch.
    #[arg(long)]
    connect: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings_service = match cli.config {
        Some(path) => SettingsService::with_path(path),
        None => SettingsService::new()?,
    };
    if let Some(address) = cli.address {
        settings_service.get_mut().target_address = address;
    }
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)?;
    info!(target = %settings.target_address, "Starting uartlink");

    let config = LinkConfig::from_settings(&settings)?;
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let platform = BtleplugPlatform::new(event_tx)
        .await
        .context("BLE platform initialization failed")?;
    let controller = LinkController::start(platform, event_rx, config);

    if cli.connect {
        controller.switch_connection();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/switch" => controller.switch_connection(),
            "/pause" => controller.pause(),
            "/resume" => controller.resume(),
            "/status" => {
                let status = controller.status();
                println!(
                    "state: {:?}, characteristic resolved: {}, paused: {}",
                    status.state,
                    status.characteristic_resolved,
                    controller.is_paused()
                );
            }
            text => controller.send_message(text),
        }
    }

    controller.shutdown();
    Ok(())
}
