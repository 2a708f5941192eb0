//! Command line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "ms500-provision")]
#[command(about = "🏭 MS500 / ESP32-P4 factory provisioning - register, flash firmware, flash models")]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true, default_value = "ms500.toml")]
    pub config: PathBuf,

    /// Serial port (e.g. /dev/ttyUSB0, COM4); auto-detected when omitted
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// Firmware build type, overrides `device.bin_type`
    #[arg(long, global = true)]
    pub bin_type: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Decrease logging verbosity (only errors)
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    /// Append logs to a file instead of stderr (default location when FILE is omitted)
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_log: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Read NVS, register the device with the server and write the new NVS image
    Info {
        /// Re-register an already provisioned device without asking
        #[arg(short = 'y', long)]
        yes: bool,
        /// Leave already provisioned devices untouched without asking
        #[arg(long, conflicts_with = "yes")]
        skip_registered: bool,
    },
    /// Flash bootloader, partition table, application and data images
    Firmware,
    /// Convert the model for this device, flash storage_dl and set the update flag
    Model {
        /// Model type, overrides `device.model_type`
        #[arg(long)]
        model_type: Option<String>,
    },
    /// Set is_model_update=1 in NVS
    Flag {
        /// Do not reset the device afterwards
        #[arg(long)]
        no_reset: bool,
    },
    /// Run info, firmware and model in sequence
    Factory {
        #[arg(short = 'y', long)]
        yes: bool,
        #[arg(long, conflicts_with = "yes")]
        skip_registered: bool,
        #[arg(long)]
        model_type: Option<String>,
    },
    /// Print the partition table of a build type
    Partitions,
    /// List ESP32-compatible serial ports
    Ports,
    /// Print the device account password derived from a unit serial number
    Password {
        /// Unit serial number
        u_sn: String,
    },
    /// Write a configuration file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
