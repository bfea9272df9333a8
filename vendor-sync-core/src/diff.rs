//! Decides which remote files are new relative to the drop location.
//!
//! Presence is judged by file name only: a file whose name already exists in
//! the destination directory is never copied again, whatever its content.
//! The recency window is evaluated against a single instant captured when the
//! [`FileDiff`] is built, so every file of one run is judged alike.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::contract::{FileDescriptor, RemoteClient, RemoteError};
use crate::profile::{DiffStrategy, NameFilter, RecencyWindow, VendorProfile};

pub struct FileDiff<'a> {
    profile: &'a VendorProfile,
    window: RecencyWindow,
    now: DateTime<Utc>,
}

impl<'a> FileDiff<'a> {
    /// Diff judged against the current instant.
    pub fn new(profile: &'a VendorProfile, window: RecencyWindow) -> Self {
        Self::at(profile, window, Utc::now())
    }

    /// Diff judged against a fixed instant.
    pub fn at(profile: &'a VendorProfile, window: RecencyWindow, now: DateTime<Utc>) -> Self {
        Self {
            profile,
            window,
            now,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Lists both sides according to the vendor's [`DiffStrategy`] and returns
    /// the files to copy, in listing order.
    ///
    /// The destination is listed first: without it nothing can be judged new,
    /// so a failure there propagates before the vendor is touched.
    pub async fn files_to_sync(
        &self,
        vendor: &dyn RemoteClient,
        destination: &dyn RemoteClient,
    ) -> Result<Vec<FileDescriptor>, RemoteError> {
        let profile = self.profile;
        let files = match &profile.diff {
            DiffStrategy::Metadata => {
                let present = names_of(&destination.list_descriptors(&profile.destination_dir).await?);
                let source = vendor.list_descriptors(&profile.source_dir).await?;
                self.select(source, &present)
            }
            DiffStrategy::MultiDir { alternate_dir, .. } => {
                let present = names_of(&destination.list_descriptors(&profile.destination_dir).await?);
                let mut source = vendor.list_descriptors(&profile.source_dir).await?;
                let alternate = vendor.list_descriptors(alternate_dir).await?;
                debug!(
                    vendor = %profile.name,
                    source = source.len(),
                    alternate = alternate.len(),
                    "[DIFF] Merging source and alternate directory listings"
                );
                source.extend(alternate);
                self.select(source, &present)
            }
            DiffStrategy::NameOnly(filter) => {
                let present: HashSet<String> = destination
                    .list_names(&profile.destination_dir)
                    .await?
                    .into_iter()
                    .collect();
                let names = vendor.list_names(&profile.source_dir).await?;
                let wanted = select_names(filter, names, &present);
                debug!(
                    vendor = %profile.name,
                    candidates = wanted.len(),
                    "[DIFF] Describing name-filtered candidates"
                );
                let mut described = Vec::with_capacity(wanted.len());
                for name in &wanted {
                    described.push(vendor.describe_one(&profile.source_dir, name).await?);
                }
                described
                    .into_iter()
                    .filter(|file| self.is_recent(file))
                    .collect()
            }
        };
        info!(
            vendor = %profile.name,
            count = files.len(),
            window_secs = self.window.duration().num_seconds(),
            "[DIFF] Computed files to sync"
        );
        Ok(files)
    }

    /// Keeps the source files that are absent from `present` and recent enough.
    pub fn select(
        &self,
        source: Vec<FileDescriptor>,
        present: &HashSet<String>,
    ) -> Vec<FileDescriptor> {
        source
            .into_iter()
            .filter(|file| !present.contains(&file.name))
            .filter(|file| self.is_recent(file))
            .collect()
    }

    pub fn is_recent(&self, file: &FileDescriptor) -> bool {
        self.window.admits(file.modified_at, self.now)
    }
}

/// Convenience wrapper: diff `profile` against the current instant.
pub async fn compute_files_to_sync(
    profile: &VendorProfile,
    window: RecencyWindow,
    vendor: &dyn RemoteClient,
    destination: &dyn RemoteClient,
) -> Result<Vec<FileDescriptor>, RemoteError> {
    FileDiff::new(profile, window)
        .files_to_sync(vendor, destination)
        .await
}

/// Names accepted by `filter` and not yet present, in listing order.
pub fn select_names(
    filter: &NameFilter,
    names: Vec<String>,
    present: &HashSet<String>,
) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| filter.accepts(name) && !present.contains(name))
        .collect()
}

fn names_of(files: &[FileDescriptor]) -> HashSet<String> {
    files.iter().map(|file| file.name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockRemoteClient;
    use chrono::Duration;

    fn at(name: &str, now: DateTime<Utc>, days_ago: i64) -> FileDescriptor {
        FileDescriptor::named(name, now - Duration::days(days_ago))
    }

    fn eastview() -> VendorProfile {
        VendorProfile::new("eastview", "eastview_src", "NSDROP/vendor_records/eastview")
    }

    #[test]
    fn select_skips_present_names_and_stale_files() {
        let now = Utc::now();
        let profile = eastview();
        let diff = FileDiff::at(&profile, RecencyWindow::from_parts(30, 0, 0), now);
        let present: HashSet<String> = ["bar.mrc".to_string()].into();
        let picked = diff.select(
            vec![
                at("foo.mrc", now, 10),
                at("bar.mrc", now, 1),
                at("stale.mrc", now, 31),
                at("edge.mrc", now, 30),
            ],
            &present,
        );
        let names: Vec<_> = picked.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["foo.mrc", "edge.mrc"]);
    }

    #[test]
    fn zero_window_keeps_everything_new() {
        let now = Utc::now();
        let profile = eastview();
        let diff = FileDiff::at(&profile, RecencyWindow::unbounded(), now);
        let picked = diff.select(vec![at("ancient.mrc", now, 5000)], &HashSet::new());
        assert_eq!(picked.len(), 1);
    }

    #[tokio::test]
    async fn empty_source_listing_yields_nothing() {
        let profile = eastview();
        let mut vendor = MockRemoteClient::new();
        let mut destination = MockRemoteClient::new();
        destination
            .expect_list_descriptors()
            .returning(|_| Ok(vec![]));
        vendor.expect_list_descriptors().returning(|_| Ok(vec![]));

        let files = compute_files_to_sync(&profile, RecencyWindow::unbounded(), &vendor, &destination)
            .await
            .expect("diff should succeed");
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn destination_listing_failure_propagates() {
        let profile = eastview();
        let mut vendor = MockRemoteClient::new();
        let mut destination = MockRemoteClient::new();
        destination.expect_list_descriptors().returning(|dir| {
            Err(RemoteError::NotFound {
                path: dir.to_string(),
            })
        });
        vendor.expect_list_descriptors().never();

        let result = compute_files_to_sync(&profile, RecencyWindow::unbounded(), &vendor, &destination).await;
        assert!(matches!(result, Err(RemoteError::NotFound { .. })));
    }

    #[tokio::test]
    async fn name_only_diff_filters_before_describing() {
        let now = Utc::now();
        let profile = VendorProfile::new("midwest_nypl", "midwest_src", "NSDROP/vendor_records/midwest_nypl")
            .with_diff(DiffStrategy::NameOnly(NameFilter {
                extension: ".mrc".into(),
                since_year: 2024,
                since_month: None,
            }));
        let mut vendor = MockRemoteClient::new();
        let mut destination = MockRemoteClient::new();
        destination
            .expect_list_names()
            .withf(|dir| dir == "NSDROP/vendor_records/midwest_nypl")
            .returning(|_| Ok(vec!["bar.mrc".to_string()]));
        vendor
            .expect_list_names()
            .withf(|dir| dir == "midwest_src")
            .returning(|_| {
                Ok(vec![
                    "foo.mrc".to_string(),
                    "bar.mrc".to_string(),
                    "old_2023.mrc".to_string(),
                ])
            });
        vendor
            .expect_describe_one()
            .withf(|dir, name| dir == "midwest_src" && name == "foo.mrc")
            .times(1)
            .returning(move |_, name| Ok(FileDescriptor::named(name, now - Duration::days(3))));
        vendor.expect_list_descriptors().never();

        let diff = FileDiff::at(&profile, RecencyWindow::unbounded(), now);
        let files = diff.files_to_sync(&vendor, &destination).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["foo.mrc"]);
    }

    #[tokio::test]
    async fn name_only_diff_applies_recency_after_describing() {
        let now = Utc::now();
        let profile = VendorProfile::new("midwest_nypl", "src", "dst").with_diff(DiffStrategy::NameOnly(NameFilter {
            extension: ".mrc".into(),
            since_year: 2024,
            since_month: None,
        }));
        let mut vendor = MockRemoteClient::new();
        let mut destination = MockRemoteClient::new();
        destination.expect_list_names().returning(|_| Ok(vec![]));
        vendor
            .expect_list_names()
            .returning(|_| Ok(vec!["fresh.mrc".to_string(), "stale.mrc".to_string()]));
        vendor.expect_describe_one().returning(move |_, name| {
            let age = if name == "fresh.mrc" { 1 } else { 90 };
            Ok(FileDescriptor::named(name, now - Duration::days(age)))
        });

        let diff = FileDiff::at(&profile, RecencyWindow::from_parts(7, 0, 0), now);
        let files = diff.files_to_sync(&vendor, &destination).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "fresh.mrc");
    }

    #[tokio::test]
    async fn multi_dir_diff_merges_both_listings_in_order() {
        let now = Utc::now();
        let profile = VendorProfile::new("bakertaylor_bpl", "bpl_src", "dst").with_diff(DiffStrategy::MultiDir {
            alternate_dir: String::new(),
            alternate_prefixes: vec!["ADD".into(), "NEW".into()],
        });
        let mut vendor = MockRemoteClient::new();
        let mut destination = MockRemoteClient::new();
        destination
            .expect_list_descriptors()
            .returning(move |_| Ok(vec![FileDescriptor::named("ORD_2.mrc", now)]));
        vendor.expect_list_descriptors().returning(move |dir| {
            if dir.is_empty() {
                Ok(vec![
                    FileDescriptor::named("ADD_1.mrc", now),
                    FileDescriptor::named("NEW_1.mrc", now),
                ])
            } else {
                Ok(vec![
                    FileDescriptor::named("ORD_1.mrc", now),
                    FileDescriptor::named("ORD_2.mrc", now),
                ])
            }
        });

        let diff = FileDiff::at(&profile, RecencyWindow::unbounded(), now);
        let files = diff.files_to_sync(&vendor, &destination).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["ORD_1.mrc", "ADD_1.mrc", "NEW_1.mrc"]);
    }
}
