// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

mod cli;
mod hfp_test;
mod monitor;
mod status;

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use bluefusion_autoconnect::ConnectionConfig;
use bluefusion_security::{BondStore, PairingCallback, SecurityError};
use bluefusion_types::Address;
use clap::Parser;
use cli::{Args, AutoConnectCommands, BondsCommands, Commands};
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::monitor::UnifiedMonitor;

/// Prompts on stdin for passkey entry and numeric comparison confirmation.
/// Good enough for the CLI; a GUI front end would swap this implementation.
struct CliPairingCallback;

impl PairingCallback for CliPairingCallback {
    fn passkey_request(&self, address: Address, prompt: &str) -> Result<String, SecurityError> {
        println!("{} {}: {}", "pairing".yellow(), address, prompt);
        print!("passkey> ");
        io::stdout().flush().ok();
        let mut line = String::new();
        io::stdin().read_line(&mut line).map_err(|_| SecurityError::Rejected)?;
        Ok(line.trim().to_string())
    }

    fn numeric_comparison(&self, address: Address, code: &str) -> Result<bool, SecurityError> {
        println!("{} {}: confirm code {} ? [y/N]", "pairing".yellow(), address, code);
        let mut line = String::new();
        io::stdin().read_line(&mut line).map_err(|_| SecurityError::Rejected)?;
        Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}

fn default_bond_store_path(args: &Args) -> PathBuf {
    args.bond_store.clone().unwrap_or_else(|| BondStore::default_path().unwrap_or_else(|_| PathBuf::from("bonds.json")))
}

fn default_autoconnect_snapshot_path(args: &Args) -> PathBuf {
    args.autoconnect_snapshot
        .clone()
        .unwrap_or_else(|| bluefusion_autoconnect::default_path().unwrap_or_else(|_| PathBuf::from("autoconnect.json")))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    if args.no_color {
        colored::control::set_override(false);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match &args.command {
        Commands::Run => {
            let monitor = build_monitor(&args).await?;
            let monitor = Arc::new(monitor);
            monitor.start().await;
            tracing::info!("bluefusion-monitor running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await.ok();
            monitor.stop().await;
            Ok(())
        }
        Commands::Status => {
            let monitor = build_monitor(&args).await?;
            let status = monitor.status().await;
            println!("{}", status.summary_line());
            Ok(())
        }
        Commands::TestHfp { address } => {
            let address: Address = address.parse()?;
            println!("{} {address}", "no classic Bluetooth backend wired up; dry-run only for".dimmed());
            let report = hfp_test::test_hfp_connection(&NullHfpTarget, address, None).await;
            for step in &report.steps {
                let marker = if step.success { "ok".green() } else { "fail".red() };
                println!("  {:?}: {} ({})", step.step, marker, step.detail);
            }
            println!("overall: {}", if report.overall_success() { "success".green() } else { "failure".red() });
            Ok(())
        }
        Commands::Bonds { command } => run_bonds(&args, command),
        Commands::AutoConnect { command } => run_autoconnect(&args, command).await,
    }
}

async fn build_monitor(args: &Args) -> Result<UnifiedMonitor, Box<dyn std::error::Error>> {
    let bond_store_path = default_bond_store_path(args);
    let snapshot_path = default_autoconnect_snapshot_path(args);
    let monitor = UnifiedMonitor::new(args.adapter.as_deref(), bond_store_path, snapshot_path, Box::new(CliPairingCallback)).await?;
    Ok(monitor)
}

fn run_bonds(args: &Args, command: &BondsCommands) -> Result<(), Box<dyn std::error::Error>> {
    let path = default_bond_store_path(args);
    let mut store = BondStore::load(&path);
    match command {
        BondsCommands::List => {
            if store.is_empty() {
                println!("no bonded devices");
            }
            for (address, record) in store.iter() {
                println!("{address}  security_level={} authenticated={}", record.security_level, record.authenticated);
            }
        }
        BondsCommands::Clear => {
            let count = store.len();
            store.clear()?;
            println!("cleared {count} bond(s)");
        }
    }
    Ok(())
}

async fn run_autoconnect(args: &Args, command: &AutoConnectCommands) -> Result<(), Box<dyn std::error::Error>> {
    let monitor = build_monitor(args).await?;
    match command {
        AutoConnectCommands::Add { address, priority } => {
            let address: Address = address.parse()?;
            let config: ConnectionConfig = (*priority).into();
            monitor.autoconnect().add_device(address, config).await;
            println!("added {address} to auto-connect");
        }
        AutoConnectCommands::Remove { address } => {
            let address: Address = address.parse()?;
            monitor.autoconnect().remove_device(address).await;
            println!("removed {address} from auto-connect");
        }
        AutoConnectCommands::List => {
            for health in monitor.autoconnect().analytics_report().await {
                println!("{:?}", health);
            }
        }
    }
    Ok(())
}

/// Stand-in for `test-hfp` until a classic Bluetooth backend is wired up;
/// every step reports unimplemented rather than silently succeeding.
struct NullHfpTarget;

#[async_trait::async_trait]
impl hfp_test::HfpTestTarget for NullHfpTarget {
    async fn connect_hfp(&self, _address: Address) -> Result<(), String> {
        Err("classic Bluetooth backend not implemented".to_string())
    }

    async fn establish_sco(&self, _address: Address) -> Result<(), String> {
        Err("classic Bluetooth backend not implemented".to_string())
    }

    async fn sample_quality(
        &self,
        _address: Address,
        _hold: std::time::Duration,
    ) -> Result<bluefusion_sco::AudioQualityMetrics, String> {
        Err("classic Bluetooth backend not implemented".to_string())
    }

    async fn disconnect(&self, _address: Address) -> Result<(), String> {
        Err("classic Bluetooth backend not implemented".to_string())
    }
}
