//! Command-line interface (clap v4 derive)

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::protocol::{
    BambuSpool, MoonrakerSettings, OutboundMessage, PrintFarmerSettings, ScaleAction, Service,
    SpoolTag, SpoolmanSettings, DEFAULT_NOZZLE_TEMPS,
};

/// spool-link - console client for RFID/NFC filament spool stations
///
/// Keeps a WebSocket link to the device, shows what it reports and sends
/// it one-shot commands.
#[derive(Parser, Debug)]
#[command(name = "spool-link")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that talks to the device
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Path to configuration file
    #[arg(short, long, env = "SPOOL_LINK_CONFIG")]
    pub config: Option<String>,

    /// Seconds to wait for the connection and for the device's answer
    #[arg(long, default_value_t = 10)]
    pub wait_secs: u64,
}

impl LinkArgs {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs.max(1))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stay connected and log device activity until Ctrl+C
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "SPOOL_LINK_CONFIG")]
        config: Option<String>,
    },

    /// Print connection, service, reader and AMS state once
    Status {
        #[command(flatten)]
        link: LinkArgs,
    },

    /// Ask the device to reconnect an upstream service
    Reconnect {
        #[arg(value_enum)]
        service: ServiceArg,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Clear the external spool holder
    SpoolOut {
        #[command(flatten)]
        link: LinkArgs,
    },

    /// Load a spool into an AMS tray
    SpoolIn {
        /// AMS unit id (255 for the external holder)
        #[arg(long)]
        ams: i64,

        /// Tray slot within the unit
        #[arg(long)]
        tray: i64,

        /// Filament material, e.g. PLA
        #[arg(long)]
        material: String,

        /// Filament brand / vendor
        #[arg(long)]
        brand: String,

        /// Hex color without '#'
        #[arg(long)]
        color: Option<String>,

        #[arg(long)]
        min_temp: Option<i64>,

        #[arg(long)]
        max_temp: Option<i64>,

        /// Bambu filament profile id
        #[arg(long)]
        tray_info_idx: Option<String>,

        /// Bambu calibration index
        #[arg(long)]
        cali_idx: Option<String>,

        /// Bambu setting id
        #[arg(long)]
        setting_id: Option<String>,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Write a storage-location tag
    WriteLocation {
        /// Location name stored on the tag
        name: String,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Write a spool tag
    WriteSpool {
        /// Spoolman spool id
        #[arg(long)]
        spool_id: i64,

        #[arg(long)]
        material: String,

        #[arg(long)]
        brand: String,

        /// Hex color without '#'
        #[arg(long)]
        color: Option<String>,

        #[arg(long)]
        min_temp: Option<i64>,

        #[arg(long)]
        max_temp: Option<i64>,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Write an OpenPrintTag record given as a JSON object
    WriteOpenPrintTag {
        /// Record fields, e.g. '{"material_type":"PLA"}'
        record: String,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Store Bambu filament settings for a Spoolman filament
    SpoolmanSettings {
        #[arg(long)]
        filament_id: i64,

        #[arg(long)]
        tray_info_idx: String,

        #[arg(long, default_value = "")]
        setting_id: String,

        #[arg(long, default_value = "-1")]
        cali_idx: String,

        #[arg(long)]
        min_temp: i64,

        #[arg(long)]
        max_temp: i64,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Save Moonraker connection settings on the device
    Moonraker {
        #[arg(long)]
        url: String,

        #[arg(long, default_value = "")]
        api_key: String,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Save PrintFarmer connection settings on the device
    PrintFarmer {
        #[arg(long)]
        url: String,

        #[arg(long, default_value = "")]
        api_key: String,

        #[arg(long)]
        printer_id: String,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Scale control
    Scale {
        #[arg(value_enum)]
        action: ScaleArg,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Display version and build information
    Version {
        /// Only print the version line
        #[arg(long)]
        short: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceArg {
    Bambu,
    Spoolman,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleArg {
    Tare,
    Calibrate,
    AutoTareOn,
    AutoTareOff,
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Write a commented default configuration file
    Init {
        /// Where to create the file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

impl Commands {
    /// Config file override for commands that load configuration
    pub fn config_path(&self) -> Option<&str> {
        match self {
            Commands::Run { config } => config.as_deref(),
            other => other.link().and_then(|link| link.config.as_deref()),
        }
    }

    pub fn link(&self) -> Option<&LinkArgs> {
        match self {
            Commands::Status { link }
            | Commands::Reconnect { link, .. }
            | Commands::SpoolOut { link }
            | Commands::SpoolIn { link, .. }
            | Commands::WriteLocation { link, .. }
            | Commands::WriteSpool { link, .. }
            | Commands::WriteOpenPrintTag { link, .. }
            | Commands::SpoolmanSettings { link, .. }
            | Commands::Moonraker { link, .. }
            | Commands::PrintFarmer { link, .. }
            | Commands::Scale { link, .. } => Some(link),
            Commands::Run { .. } | Commands::Version { .. } | Commands::Config { .. } => None,
        }
    }

    /// The device message a one-shot command sends, `None` for the rest
    pub fn action(&self) -> Result<Option<OutboundMessage>> {
        let message = match self {
            Commands::Reconnect { service, .. } => OutboundMessage::Reconnect {
                payload: match service {
                    ServiceArg::Bambu => Service::Bambu,
                    ServiceArg::Spoolman => Service::Spoolman,
                },
            },

            Commands::SpoolOut { .. } => OutboundMessage::SetBambuSpool {
                payload: BambuSpool::external_out(),
            },

            Commands::SpoolIn {
                ams,
                tray,
                material,
                brand,
                color,
                min_temp,
                max_temp,
                tray_info_idx,
                cali_idx,
                setting_id,
                ..
            } => OutboundMessage::SetBambuSpool {
                payload: BambuSpool::load(
                    *ams,
                    *tray,
                    color.as_deref(),
                    material.as_str(),
                    brand.as_str(),
                    temps(*min_temp, *max_temp),
                    tray_info_idx.as_deref(),
                    cali_idx.as_deref(),
                    setting_id.as_deref(),
                ),
            },

            Commands::WriteLocation { name, .. } => {
                if name.trim().is_empty() {
                    return Err(Error::Config("location name cannot be empty".to_string()));
                }
                OutboundMessage::write_location_tag(name.trim())
            }

            Commands::WriteSpool {
                spool_id,
                material,
                brand,
                color,
                min_temp,
                max_temp,
                ..
            } => OutboundMessage::write_spool_tag(SpoolTag::new(
                *spool_id,
                material.as_str(),
                brand.as_str(),
                color.as_deref(),
                Some(temps(*min_temp, *max_temp)),
            )),

            Commands::WriteOpenPrintTag { record, .. } => {
                let payload: Map<String, Value> = serde_json::from_str(record)
                    .map_err(|e| Error::malformed(format!("OpenPrintTag record: {}", e)))?;
                OutboundMessage::WriteOpenPrintTag { payload }
            }

            Commands::SpoolmanSettings {
                filament_id,
                tray_info_idx,
                setting_id,
                cali_idx,
                min_temp,
                max_temp,
                ..
            } => OutboundMessage::SetSpoolmanSettings {
                payload: SpoolmanSettings {
                    filament_id: *filament_id,
                    tray_info_idx: tray_info_idx.clone(),
                    setting_id: setting_id.clone(),
                    cali_idx: cali_idx.clone(),
                    temp_min: min_temp.to_string(),
                    temp_max: max_temp.to_string(),
                },
            },

            Commands::Moonraker { url, api_key, .. } => OutboundMessage::SaveMoonrakerSettings {
                payload: MoonrakerSettings {
                    url: url.clone(),
                    api_key: api_key.clone(),
                },
            },

            Commands::PrintFarmer {
                url,
                api_key,
                printer_id,
                ..
            } => OutboundMessage::SavePrintFarmerSettings {
                payload: PrintFarmerSettings {
                    url: url.clone(),
                    api_key: api_key.clone(),
                    printer_id: printer_id.clone(),
                },
            },

            Commands::Scale { action, .. } => match action {
                ScaleArg::Tare => OutboundMessage::Scale {
                    payload: ScaleAction::Tare,
                    enabled: None,
                },
                ScaleArg::Calibrate => OutboundMessage::Scale {
                    payload: ScaleAction::Calibrate,
                    enabled: None,
                },
                ScaleArg::AutoTareOn => OutboundMessage::set_auto_tare(true),
                ScaleArg::AutoTareOff => OutboundMessage::set_auto_tare(false),
            },

            Commands::Run { .. }
            | Commands::Status { .. }
            | Commands::Version { .. }
            | Commands::Config { .. } => return Ok(None),
        };

        Ok(Some(message))
    }
}

fn temps(min: Option<i64>, max: Option<i64>) -> (i64, i64) {
    (
        min.unwrap_or(DEFAULT_NOZZLE_TEMPS.0),
        max.unwrap_or(DEFAULT_NOZZLE_TEMPS.1),
    )
}
