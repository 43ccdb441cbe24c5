use anyhow::Context;
use clap::{Parser, Subcommand};
use coe_rs::coe::monitor::{monitor_event, MonitorFilter};
use coe_rs::{init_logger, log_info, CmiClient, CmiClientConfig, DataKind, ProtocolRevision};
use std::net::IpAddr;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "coe-cli")]
#[command(about = "CLI tool for the TA CMI CoE protocol")]
struct Cli {
    /// CMI address
    #[arg(long, default_value = "192.168.0.100")]
    host: IpAddr,

    /// CoE protocol revision (1 or 2)
    #[arg(long, default_value = "1")]
    version: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every decoded inbound reading
    Monitor {
        /// Only show readings from this CAN node (0 = any)
        #[arg(long, default_value = "0")]
        node: u8,
        /// Only show analog or digital readings
        #[arg(long)]
        kind: Option<String>,
    },
    /// Send one analog output value
    SendAnalog {
        output: u8,
        value: f64,
        #[arg(short, long, default_value = "0")]
        unit: u8,
        #[arg(short, long, default_value = "1")]
        node: u8,
    },
    /// Send one digital output state
    SendDigital {
        output: u8,
        #[arg(value_parser = parse_on_off)]
        state: bool,
        #[arg(short, long, default_value = "1")]
        node: u8,
    },
    /// Send a whole analog block (four comma-separated values)
    SendBlock {
        block: u8,
        #[arg(value_delimiter = ',')]
        values: Vec<f64>,
        #[arg(short, long, value_delimiter = ',')]
        units: Option<Vec<u8>>,
        #[arg(short, long, default_value = "1")]
        node: u8,
    },
}

fn parse_on_off(value: &str) -> Result<bool, String> {
    match value {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        other => Err(format!("expected on/off, got {other}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    let revision = ProtocolRevision::from_number(cli.version)
        .with_context(|| format!("unsupported CoE version {}", cli.version))?;
    let client = CmiClient::connect_with_config(CmiClientConfig::new(cli.host, revision))
        .await
        .context("failed to open CoE socket")?;

    match cli.command {
        Commands::Monitor { node, kind } => {
            let kind = match kind.as_deref() {
                Some("analog") => Some(DataKind::Analog),
                Some("digital") => Some(DataKind::Digital),
                Some(other) => anyhow::bail!("unknown data kind {other}"),
                None => None,
            };
            let filter = MonitorFilter { node, kind };
            let mut readings = client.subscribe();
            log_info(&format!("monitoring CoE V{} on {}", revision.number(), cli.host));
            while let Ok(inbound) = readings.recv().await {
                if filter.matches(&inbound.reading) {
                    println!("{}", serde_json::to_string(&monitor_event(&inbound))?);
                }
            }
        }
        Commands::SendAnalog { output, value, unit, node } => {
            client.write_output(node, output, value, unit)?;
            wait_for_flush().await;
            log_info(&format!("sent analog output {output} = {value}"));
        }
        Commands::SendDigital { output, state, node } => {
            client.write_digital_output(node, output, state)?;
            wait_for_flush().await;
            log_info(&format!(
                "sent digital output {output} = {}",
                if state { "ON" } else { "OFF" }
            ));
        }
        Commands::SendBlock { block, values, units, node } => {
            let values: [f64; 4] = values
                .try_into()
                .map_err(|_| anyhow::anyhow!("expected exactly 4 values"))?;
            let units: [u8; 4] = match units {
                Some(units) => units
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("expected exactly 4 units"))?,
                None => [0; 4],
            };
            client.write_analog_block(node, block, values, units)?;
            wait_for_flush().await;
            log_info(&format!("sent analog block {block}"));
        }
    }

    client.shutdown();
    Ok(())
}

/// One-shot sends exit right after the debounce window has flushed.
async fn wait_for_flush() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}
