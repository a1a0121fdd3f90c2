use std::path::PathBuf;

use bluefusion_autoconnect::{ConnectionConfig, Priority};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bluefusion-monitor", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Bluetooth adapter to use; defaults to the OS's first adapter.
    #[arg(long, global = true)]
    pub adapter: Option<String>,

    /// Bond store path. Defaults to `<home>/.bluefusion/bonds.json`.
    #[arg(long, global = true)]
    pub bond_store: Option<PathBuf>,

    /// Auto-connect snapshot path. Defaults to
    /// `<home>/.bluefusion/autoconnect.json`.
    #[arg(long, global = true)]
    pub autoconnect_snapshot: Option<PathBuf>,

    /// Disable ANSI color in human-readable output.
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the monitor: starts all collectors, the auto-connect manager and
    /// the packet/scan/HFP loops, and blocks until interrupted.
    Run,

    /// Print a one-shot combined status snapshot.
    Status,

    /// Run the fixed connect/SCO/quality/disconnect diagnostic against one
    /// address and print a report.
    TestHfp {
        /// Target device address, e.g. `AA:BB:CC:DD:EE:FF`.
        address: String,
    },

    /// Bond store inspection and maintenance.
    Bonds {
        #[command(subcommand)]
        command: BondsCommands,
    },

    /// Auto-connect managed-device administration.
    AutoConnect {
        #[command(subcommand)]
        command: AutoConnectCommands,
    },
}

#[derive(Subcommand)]
pub enum BondsCommands {
    /// List every bonded address and its security level.
    List,
    /// Remove every stored bond.
    Clear,
}

#[derive(Subcommand)]
pub enum AutoConnectCommands {
    /// Add a device to the auto-connect manager with a given priority.
    Add {
        address: String,
        #[arg(long, value_enum, default_value = "medium")]
        priority: PriorityArg,
    },
    /// Stop managing a device.
    Remove { address: String },
    /// List managed devices and their health scores.
    List,
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::High => Priority::High,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::Low => Priority::Low,
        }
    }
}

impl From<PriorityArg> for ConnectionConfig {
    fn from(value: PriorityArg) -> Self {
        ConnectionConfig { priority: value.into(), ..ConnectionConfig::default() }
    }
}
