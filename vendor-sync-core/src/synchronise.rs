//! Top-level vendor sync: diff, fetch, validate, report and upload.
//!
//! Vendors are processed one after another, files within a vendor one after
//! another. Each vendor runs inside its own pair of sessions (drop location
//! first, then vendor server) which are closed on every exit path.
//!
//! # Failure scopes
//! - Opening a session, listing, fetching or uploading fails the vendor: it is
//!   logged, recorded as [`SyncStatus::SkippedDueToError`] and the run moves on.
//! - Decoding, validation and reporting failures are logged per file and never
//!   keep the file from being uploaded.
//!
//! # Navigation
//! - Main entrypoint: [`Synchroniser::run`]
//! - Re-validating files already at the drop location:
//!   [`Synchroniser::validate_destination_files`]

use tracing::{debug, error, info, warn};

use crate::contract::{
    Connector, FetchedFile, FileDescriptor, RecordValidator, RemoteClient, RemoteError,
};
use crate::diff::FileDiff;
use crate::profile::{RecencyWindow, VendorProfile};
use crate::report::ReportPublisher;
use crate::validate::{ValidationPipeline, ValidationTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Ok,
    SkippedDueToError,
}

/// Outcome of one vendor within one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub vendor: String,
    pub files_found: usize,
    pub files_copied: usize,
    pub status: SyncStatus,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub results: Vec<SyncResult>,
}

impl SyncReport {
    pub fn files_copied(&self) -> usize {
        self.results.iter().map(|r| r.files_copied).sum()
    }

    pub fn skipped_vendors(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .filter(|r| r.status == SyncStatus::SkippedDueToError)
            .map(|r| r.vendor.as_str())
    }

    pub fn result_for(&self, vendor: &str) -> Option<&SyncResult> {
        self.results.iter().find(|r| r.vendor.eq_ignore_ascii_case(vendor))
    }
}

#[derive(Debug, Default)]
struct Progress {
    found: usize,
    copied: usize,
}

pub struct Synchroniser<'a> {
    connector: &'a dyn Connector,
    destination: String,
    validator: &'a dyn RecordValidator,
    publisher: Option<ReportPublisher<'a>>,
}

impl<'a> Synchroniser<'a> {
    /// `destination` names the connection of the drop location.
    pub fn new(
        connector: &'a dyn Connector,
        destination: impl Into<String>,
        validator: &'a dyn RecordValidator,
    ) -> Self {
        Self {
            connector,
            destination: destination.into(),
            validator,
            publisher: None,
        }
    }

    /// Without a publisher validation tables are only logged.
    pub fn with_publisher(mut self, publisher: ReportPublisher<'a>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Syncs every profile in order. Never fails: vendor failures end up in
    /// the report.
    pub async fn run(&self, profiles: &[VendorProfile], window: RecencyWindow) -> SyncReport {
        info!(
            vendors = profiles.len(),
            window_secs = window.duration().num_seconds(),
            "[SYNC] Starting vendor file sync"
        );
        let mut report = SyncReport::default();
        for profile in profiles {
            let mut progress = Progress::default();
            let status = match self.sync_vendor(profile, window, &mut progress).await {
                Ok(()) => SyncStatus::Ok,
                Err(e) => {
                    error!(
                        vendor = %profile.name,
                        error = %e,
                        files_found = progress.found,
                        files_copied = progress.copied,
                        "[SYNC][ERROR] Vendor skipped after error"
                    );
                    SyncStatus::SkippedDueToError
                }
            };
            report.results.push(SyncResult {
                vendor: profile.name.clone(),
                files_found: progress.found,
                files_copied: progress.copied,
                status,
            });
        }
        info!(
            copied = report.files_copied(),
            skipped = report.skipped_vendors().count(),
            "[SYNC] Vendor file sync finished"
        );
        report
    }

    async fn sync_vendor(
        &self,
        profile: &VendorProfile,
        window: RecencyWindow,
        progress: &mut Progress,
    ) -> Result<(), RemoteError> {
        let destination = self.connector.connect(&self.destination).await?;
        let outcome = match self.connector.connect(&profile.connection).await {
            Ok(vendor) => {
                let outcome = self
                    .copy_new_files(profile, window, vendor.as_ref(), destination.as_ref(), progress)
                    .await;
                close_session(vendor.as_ref(), &profile.connection).await;
                outcome
            }
            Err(e) => Err(e),
        };
        close_session(destination.as_ref(), &self.destination).await;
        outcome
    }

    async fn copy_new_files(
        &self,
        profile: &VendorProfile,
        window: RecencyWindow,
        vendor: &dyn RemoteClient,
        destination: &dyn RemoteClient,
        progress: &mut Progress,
    ) -> Result<(), RemoteError> {
        let files = FileDiff::new(profile, window)
            .files_to_sync(vendor, destination)
            .await?;
        progress.found = files.len();
        info!(
            vendor = %profile.name,
            count = files.len(),
            "[SYNC] ({0}) {1} file(s) on {0} server to copy to NSDROP",
            profile.name,
            files.len()
        );

        for descriptor in &files {
            let source_dir = profile.source_dir_for(&descriptor.name);
            debug!(vendor = %profile.name, file = %descriptor.name, dir = %source_dir, "[SYNC] Fetching file");
            let fetched = vendor.fetch(descriptor, source_dir).await?;

            if profile.validate {
                self.validate_and_report(&profile.name, &fetched).await;
            }

            if destination
                .exists(&profile.destination_dir, fetched.name())
                .await?
            {
                info!(
                    vendor = %profile.name,
                    file = %fetched.name(),
                    dir = %profile.destination_dir,
                    "[SYNC] File appeared at destination since listing; not copied"
                );
                continue;
            }
            destination
                .upload(&fetched, &profile.destination_dir)
                .await?;
            progress.copied += 1;
            debug!(vendor = %profile.name, file = %fetched.name(), "[SYNC] Uploaded file");
        }

        info!(
            vendor = %profile.name,
            count = progress.copied,
            dir = %profile.destination_dir,
            "[SYNC] (NSDROP) {} file(s) copied to {}",
            progress.copied,
            profile.destination_dir
        );
        Ok(())
    }

    /// Validates and publishes one file. Never fails: every error is logged
    /// with vendor and file and the caller carries on.
    async fn validate_and_report(&self, vendor: &str, file: &FetchedFile) -> Option<ValidationTable> {
        let table = match ValidationPipeline::new(self.validator).validate(file, vendor) {
            Ok(table) => table,
            Err(e) => {
                warn!(
                    vendor = %vendor,
                    file = %file.name(),
                    error = %e,
                    "[SYNC][ERROR] Could not validate file"
                );
                return None;
            }
        };
        info!(
            vendor = %vendor,
            file = %file.name(),
            records = table.len(),
            invalid = table.invalid_count(),
            "[SYNC] Validated file"
        );

        match &self.publisher {
            Some(publisher) => {
                if let Err(e) = publisher.publish(&table).await {
                    error!(
                        vendor = %vendor,
                        file = %file.name(),
                        error = ?e,
                        "[SYNC][ERROR] Unexpected failure while publishing validation results"
                    );
                }
            }
            None => debug!(
                vendor = %vendor,
                file = %file.name(),
                "[SYNC] No report sink configured; validation results not published"
            ),
        }
        Some(table)
    }

    /// Validates and publishes files already at the vendor's destination
    /// directory: the named ones, or every file when `files` is `None`.
    ///
    /// Only opening the session or listing the directory fails the call.
    /// Files that cannot be described, fetched or decoded are logged and left
    /// out of the returned tables.
    pub async fn validate_destination_files(
        &self,
        profile: &VendorProfile,
        files: Option<&[String]>,
    ) -> Result<Vec<ValidationTable>, RemoteError> {
        let destination = self.connector.connect(&self.destination).await?;
        let outcome = self
            .revalidate(profile, files, destination.as_ref())
            .await;
        close_session(destination.as_ref(), &self.destination).await;
        outcome
    }

    async fn revalidate(
        &self,
        profile: &VendorProfile,
        files: Option<&[String]>,
        destination: &dyn RemoteClient,
    ) -> Result<Vec<ValidationTable>, RemoteError> {
        let dir = &profile.destination_dir;
        let descriptors: Vec<FileDescriptor> = match files {
            None => destination.list_descriptors(dir).await?,
            Some(names) => {
                let mut described = Vec::with_capacity(names.len());
                for name in names {
                    match destination.describe_one(dir, name).await {
                        Ok(descriptor) => described.push(descriptor),
                        Err(e) => warn!(
                            vendor = %profile.name,
                            file = %name,
                            error = %e,
                            "[SYNC][ERROR] File not found at destination"
                        ),
                    }
                }
                described
            }
        };
        info!(
            vendor = %profile.name,
            count = descriptors.len(),
            dir = %dir,
            "[SYNC] Validating files at destination"
        );

        let mut tables = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let fetched = match destination.fetch(descriptor, dir).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(
                        vendor = %profile.name,
                        file = %descriptor.name,
                        error = %e,
                        "[SYNC][ERROR] Could not fetch file from destination"
                    );
                    continue;
                }
            };
            if let Some(table) = self.validate_and_report(&profile.name, &fetched).await {
                tables.push(table);
            }
        }
        Ok(tables)
    }
}

async fn close_session(session: &dyn RemoteClient, connection: &str) {
    match session.close().await {
        Ok(()) => info!(connection = %connection, "[SYNC] Client session closed"),
        Err(e) => warn!(
            connection = %connection,
            error = %e,
            "[SYNC][ERROR] Failed to close client session"
        ),
    }
}
