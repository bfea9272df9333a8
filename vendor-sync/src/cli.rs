//! Command-line interface for vendor-sync: command parsing and wiring of the
//! filesystem connector and sheets sink into the core [`Synchroniser`].
//!
//! All decision logic lives in `vendor-sync-core`; this module only loads
//! configuration, builds collaborators and prints a summary.
//!
//! For programmatic use and integration tests call [`run`] with a
//! constructed [`Cli`].

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use vendor_sync_core::profile::{RecencyWindow, VendorProfile};
use vendor_sync_core::report::{ReportPublisher, ReportTarget};
use vendor_sync_core::synchronise::{SyncReport, SyncStatus, Synchroniser};

use crate::load_config::{load_config, AppConfig};
use crate::remote::LocalConnector;
use crate::sheets::SheetsClient;

/// Retrieve MARC files from vendor servers into the drop location.
#[derive(Parser)]
#[clap(
    name = "vendor-sync",
    version,
    about = "Copy new vendor MARC files into the drop location and report validation results"
)]
pub struct Cli {
    /// Path to the YAML config file
    #[clap(long, env = "VENDOR_SYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Send validation results to the test ranges of the report sheet
    #[clap(long, global = true)]
    pub test: bool,

    /// Directory for the rolling log file; console only when absent
    #[clap(long, env = "VENDOR_SYNC_LOG_DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy every new file of every configured vendor
    AllVendorFiles,

    /// Copy new files modified in the last day, for every configured vendor
    DailyVendorFiles,

    /// Copy new files modified within the given window for the named vendors
    RecentVendorFiles {
        /// Vendor name, repeatable; `all` selects every configured vendor
        #[clap(short = 'v', long = "vendor", required = true, num_args = 1..)]
        vendors: Vec<String>,
        #[clap(short, long, default_value_t = 0)]
        days: u32,
        #[clap(short = 'H', long, default_value_t = 0)]
        hours: u32,
        #[clap(short, long, default_value_t = 0)]
        minutes: u32,
    },

    /// List the configured vendors
    AvailableVendors,

    /// Validate files already at a vendor's destination directory
    ValidateVendorFiles {
        #[clap(short = 'v', long = "vendor")]
        vendor: String,
        /// File name, repeatable; every file in the directory when omitted
        #[clap(short = 'f', long = "file")]
        files: Vec<String>,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let config_path = cli
        .config
        .ok_or_else(|| anyhow!("no configuration file given; pass --config or set VENDOR_SYNC_CONFIG"))?;
    let config = load_config(config_path)?;
    let target = if cli.test {
        ReportTarget::Test
    } else {
        ReportTarget::Production
    };

    match cli.command {
        Commands::AllVendorFiles => {
            info!(command = "all-vendor-files", "Starting vendor file sync");
            sync(&config, &config.vendors, RecencyWindow::unbounded(), target).await
        }
        Commands::DailyVendorFiles => {
            info!(command = "daily-vendor-files", "Starting vendor file sync");
            sync(&config, &config.vendors, RecencyWindow::from_parts(1, 0, 0), target).await
        }
        Commands::RecentVendorFiles {
            vendors,
            days,
            hours,
            minutes,
        } => {
            let profiles = config.select_vendors(&vendors)?;
            let window = RecencyWindow::from_parts(days.into(), hours.into(), minutes.into());
            info!(
                command = "recent-vendor-files",
                vendors = ?profiles.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
                "Starting vendor file sync"
            );
            sync(&config, &profiles, window, target).await
        }
        Commands::AvailableVendors => {
            let names = config.vendor_names();
            if names.is_empty() {
                println!("No vendors available.");
            } else {
                println!("Available vendors: {names:?}");
            }
            Ok(())
        }
        Commands::ValidateVendorFiles { vendor, files } => {
            let profile = config.vendor(&vendor)?.clone();
            info!(command = "validate-vendor-files", vendor = %profile.name, "Validating destination files");
            validate(&config, &profile, &files, target).await
        }
    }
}

/// The sheets client, only when some selected vendor is validated and a
/// report section is configured.
fn report_sink(config: &AppConfig, profiles: &[VendorProfile]) -> Result<Option<SheetsClient>> {
    if !profiles.iter().any(|p| p.validate) {
        return Ok(None);
    }
    match &config.report {
        Some(report) => SheetsClient::new_from_env(report).map(Some),
        None => {
            info!("No report section configured; validation results are logged only");
            Ok(None)
        }
    }
}

async fn sync(
    config: &AppConfig,
    profiles: &[VendorProfile],
    window: RecencyWindow,
    target: ReportTarget,
) -> Result<()> {
    let connector = LocalConnector::new(&config.connections);
    let sheets = report_sink(config, profiles)?;
    let mut synchroniser = Synchroniser::new(
        &connector,
        config.destination.connection.clone(),
        &config.validation,
    );
    if let Some(sheets) = &sheets {
        synchroniser = synchroniser.with_publisher(ReportPublisher::new(sheets, target));
    }

    let report = synchroniser.run(profiles, window).await;
    print_summary(&report);
    Ok(())
}

async fn validate(
    config: &AppConfig,
    profile: &VendorProfile,
    files: &[String],
    target: ReportTarget,
) -> Result<()> {
    let connector = LocalConnector::new(&config.connections);
    let sheets = report_sink(config, &[profile.clone().with_validation(true)])?;
    let mut synchroniser = Synchroniser::new(
        &connector,
        config.destination.connection.clone(),
        &config.validation,
    );
    if let Some(sheets) = &sheets {
        synchroniser = synchroniser.with_publisher(ReportPublisher::new(sheets, target));
    }

    let selection = (!files.is_empty()).then_some(files);
    let tables = synchroniser
        .validate_destination_files(profile, selection)
        .await?;
    let invalid: usize = tables.iter().map(|t| t.invalid_count()).sum();
    println!(
        "{}: validated {} file(s), {} invalid record(s)",
        profile.name,
        tables.len(),
        invalid
    );
    Ok(())
}

fn print_summary(report: &SyncReport) {
    for result in &report.results {
        let status = match result.status {
            SyncStatus::Ok => "ok",
            SyncStatus::SkippedDueToError => "skipped due to error",
        };
        println!(
            "{}: {} file(s) found, {} copied ({})",
            result.vendor, result.files_found, result.files_copied, status
        );
    }
}
