//! `load_config`: reads the YAML configuration into vendor profiles, the
//! connection table, validation rules and the optional report section.
//!
//! This is the only place untrusted YAML is parsed. Every problem found here
//! is a startup error: nothing is synced from an incomplete configuration.
//!
//! Secrets stay out of the file; the report token is read from the
//! environment when the sheets client is built.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;
use tracing::{error, info};
use vendor_sync_core::profile::{DiffStrategy, VendorProfile};
use vendor_sync_core::validate::FieldRules;

pub const DEFAULT_SHEETS_URL: &str = "https://sheets.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionConfig {
    /// A server reachable as a mounted directory.
    Local { root: PathBuf },
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationSection {
    /// Key into `connections`.
    pub connection: String,
    /// Parent of the per-vendor directories, e.g. `NSDROP/vendor_records`.
    pub records_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportSection {
    pub spreadsheet_id: String,
    #[serde(default = "default_sheets_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_sheets_url() -> String {
    DEFAULT_SHEETS_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
struct VendorSection {
    name: String,
    #[serde(default)]
    connection: Option<String>,
    source_dir: String,
    #[serde(default)]
    destination_dir: Option<String>,
    #[serde(default)]
    validate: bool,
    #[serde(default)]
    diff: DiffStrategy,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    destination: DestinationSection,
    #[serde(default)]
    report: Option<ReportSection>,
    #[serde(default)]
    validation: FieldRules,
    #[serde(default)]
    connections: HashMap<String, ConnectionConfig>,
    #[serde(default)]
    vendors: Vec<VendorSection>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub destination: DestinationSection,
    pub report: Option<ReportSection>,
    pub validation: FieldRules,
    pub connections: HashMap<String, ConnectionConfig>,
    /// In configuration order, names upper-cased.
    pub vendors: Vec<VendorProfile>,
}

impl AppConfig {
    pub fn vendor_names(&self) -> Vec<&str> {
        self.vendors.iter().map(|v| v.name.as_str()).collect()
    }

    /// Profile of one vendor, matched case-insensitively.
    pub fn vendor(&self, name: &str) -> Result<&VendorProfile> {
        self.vendors
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                anyhow!(
                    "unknown vendor `{name}`; available vendors: {:?}",
                    self.vendor_names()
                )
            })
    }

    /// Profiles for the requested names, in request order. `all` selects
    /// every configured vendor.
    pub fn select_vendors(&self, names: &[String]) -> Result<Vec<VendorProfile>> {
        if names.is_empty() {
            bail!("no vendor selected");
        }
        if names.iter().any(|n| n.eq_ignore_ascii_case("all")) {
            return Ok(self.vendors.clone());
        }
        names
            .iter()
            .map(|name| self.vendor(name).cloned())
            .collect()
    }
}

/// Loads and checks the configuration file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => conf,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let config = resolve(raw)?;
    info!(
        config_path = ?path_ref,
        vendors = config.vendors.len(),
        connections = config.connections.len(),
        report = config.report.is_some(),
        "Parsed config YAML successfully"
    );
    Ok(config)
}

fn resolve(raw: RawConfig) -> Result<AppConfig> {
    if raw.vendors.is_empty() {
        bail!("configuration lists no vendors");
    }
    if !raw.connections.contains_key(&raw.destination.connection) {
        bail!(
            "destination connection `{}` is not defined under `connections`",
            raw.destination.connection
        );
    }

    let records_dir = raw.destination.records_dir.trim_end_matches('/');
    let mut vendors: Vec<VendorProfile> = Vec::with_capacity(raw.vendors.len());
    for section in raw.vendors {
        let mut profile = VendorProfile::new(
            section.name,
            section.source_dir,
            section.destination_dir.unwrap_or_default(),
        )
        .with_validation(section.validate)
        .with_diff(section.diff);
        if profile.destination_dir.is_empty() {
            profile.destination_dir = format!("{records_dir}/{}", profile.name.to_lowercase());
        }
        if let Some(connection) = section.connection {
            profile = profile.with_connection(connection);
        }

        if vendors.iter().any(|v| v.name == profile.name) {
            bail!("vendor `{}` is configured more than once", profile.name);
        }
        if !raw.connections.contains_key(&profile.connection) {
            bail!(
                "vendor `{}` uses connection `{}` which is not defined under `connections`",
                profile.name,
                profile.connection
            );
        }
        vendors.push(profile);
    }

    Ok(AppConfig {
        destination: raw.destination,
        report: raw.report,
        validation: raw.validation,
        connections: raw.connections,
        vendors,
    })
}
