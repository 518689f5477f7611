mod commands;
mod errors;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use fastcp_protocol::client::Client;
use fastcp_protocol::errors::ClientError;
use fastcp_protocol::payload::{ReconcileSummary, ServiceStatus, SystemStatus};
use serde_json::Value;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::commands::Commands;
use crate::errors::{CliError, Result};

/// fastcp-agentctl - talk to the FastCP agent over its Unix socket
#[derive(Parser, Debug)]
#[command(name = "fastcp-agentctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Agent socket path
    #[arg(
        short,
        long,
        global = true,
        env = "FASTCP_AGENT_SOCKET",
        default_value = "/opt/fastcp/run/agent.sock"
    )]
    pub socket: PathBuf,

    /// Print raw JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut client = match Client::connect(&cli.socket).await {
        Ok(c) => c,
        Err(ClientError::Connect { socket_path, source }) => {
            eprintln!(
                "Cannot reach the agent at {}: {}",
                socket_path.display(),
                source
            );
            eprintln!("Is fastcp-agent running? Check: systemctl status fastcp-agent");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };
    debug!("connected to {}", cli.socket.display());

    match cli.command {
        Commands::Call {
            method,
            params,
            timeout,
        } => {
            let params = parse_params(&params)?;
            let result = match timeout {
                Some(secs) => {
                    client
                        .call_with_timeout(&method, params, Duration::from_secs(secs))
                        .await?
                }
                None => client.call(&method, params).await?,
            };
            print_json(&result);
        }

        Commands::Status => {
            let value = client.call("system.status", Value::Object(Default::default())).await?;
            if cli.json {
                print_json(&value);
            } else {
                let status: SystemStatus = serde_json::from_value(value).map_err(CliError::Decode)?;
                print_status(&status);
            }
        }

        Commands::Services => {
            let value = client.call("system.services", Value::Object(Default::default())).await?;
            if cli.json {
                print_json(&value);
            } else {
                let services: Vec<ServiceStatus> =
                    serde_json::from_value(value).map_err(CliError::Decode)?;
                print_services(&services);
            }
        }

        Commands::Reload => {
            let value = client.call("caddy.reload", Value::Object(Default::default())).await?;
            if cli.json {
                print_json(&value);
            } else {
                let summary: ReconcileSummary =
                    serde_json::from_value(value).map_err(CliError::Decode)?;
                print_reload(&summary);
            }
        }
    }

    Ok(())
}

/// Params given on the command line; anything but an object is rejected.
fn parse_params(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).map_err(CliError::InvalidParams)?;
    if !value.is_object() {
        return Err(CliError::ParamsNotObject);
    }
    Ok(value)
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

// ============================================================================
// Formatting
// ============================================================================

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn format_uptime(secs: i64) -> String {
    if secs <= 0 {
        return "-".to_string();
    }
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes.max(1))
    }
}

fn usage(used: u64, total: u64) -> String {
    if total == 0 {
        return "-".to_string();
    }
    format!(
        "{} / {} ({:.0}%)",
        format_bytes(used),
        format_bytes(total),
        used as f64 * 100.0 / total as f64
    )
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

fn print_status(status: &SystemStatus) {
    let rows = [
        ("Host", or_dash(&status.hostname).to_string()),
        ("OS", or_dash(&status.os).to_string()),
        (
            "Kernel",
            format!("{} ({})", or_dash(&status.kernel_version), or_dash(&status.architecture)),
        ),
        ("Uptime", format_uptime(status.uptime)),
        ("Load", format!("{:.2}", status.load_average)),
        ("Memory", usage(status.memory_used, status.memory_total)),
        ("Disk", usage(status.disk_used, status.disk_total)),
        ("PHP", or_dash(&status.php_version).to_string()),
        ("PHP available", status.php_available_versions.join(", ")),
        ("MySQL", or_dash(&status.mysql_version).to_string()),
        ("Caddy", or_dash(&status.caddy_version).to_string()),
        (
            "Tenants",
            format!(
                "{} users, {} sites, {} databases",
                status.total_users, status.total_websites, status.total_databases
            ),
        ),
    ];
    for (label, value) in rows {
        println!("{:<14} {}", format!("{}:", label).bold(), value);
    }
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "ENABLED")]
    enabled: String,
}

fn service_row(service: &ServiceStatus) -> ServiceRow {
    let status = if service.status == "running" {
        service.status.green().to_string()
    } else {
        service.status.red().to_string()
    };
    ServiceRow {
        name: service.name.clone(),
        status,
        enabled: if service.enabled { "yes" } else { "no" }.to_string(),
    }
}

fn print_services(services: &[ServiceStatus]) {
    let rows: Vec<ServiceRow> = services.iter().map(service_row).collect();
    let table = Table::new(rows).with(Style::blank()).to_string();
    println!("{table}");
}

fn print_reload(summary: &ReconcileSummary) {
    println!(
        "{} proxy {}: {} sites, {} pools written, {} removed",
        "OK".green().bold(),
        summary.proxy_action,
        summary.sites,
        summary.pools_written,
        summary.pools_removed
    );
    if !summary.php_versions.is_empty() {
        println!("PHP versions: {}", summary.php_versions.join(", "));
    }
    for warning in &summary.warnings {
        println!("{} {}", "warning:".yellow(), warning);
    }
}
