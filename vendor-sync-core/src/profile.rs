//! Vendor profiles and the policies attached to them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Static description of one vendor. Read-only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorProfile {
    /// Upper-cased vendor name, e.g. `EASTVIEW`.
    pub name: String,
    /// Connection used to reach the vendor server.
    pub connection: String,
    /// Directory on the vendor server holding the vendor's files.
    pub source_dir: String,
    /// Directory on the drop location the files are copied into.
    pub destination_dir: String,
    /// Whether fetched files are validated and reported.
    pub validate: bool,
    pub diff: DiffStrategy,
}

impl VendorProfile {
    /// Profile with a metadata diff and validation turned off. The connection
    /// defaults to the lower-cased vendor name.
    pub fn new(
        name: impl Into<String>,
        source_dir: impl Into<String>,
        destination_dir: impl Into<String>,
    ) -> Self {
        let name = name.into().to_uppercase();
        Self {
            connection: name.to_lowercase(),
            name,
            source_dir: source_dir.into(),
            destination_dir: destination_dir.into(),
            validate: false,
            diff: DiffStrategy::Metadata,
        }
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = connection.into();
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn with_diff(mut self, diff: DiffStrategy) -> Self {
        self.diff = diff;
        self
    }

    /// Directory a listed file has to be fetched from. Files whose names carry
    /// one of the alternate prefixes of a multi-directory vendor live in the
    /// alternate directory.
    pub fn source_dir_for(&self, file_name: &str) -> &str {
        match &self.diff {
            DiffStrategy::MultiDir {
                alternate_dir,
                alternate_prefixes,
            } if alternate_prefixes
                .iter()
                .any(|prefix| file_name.starts_with(prefix.as_str())) =>
            {
                alternate_dir
            }
            _ => &self.source_dir,
        }
    }
}

/// How a vendor's new files are discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum DiffStrategy {
    /// Full listings on both sides, presence checked by name.
    #[default]
    Metadata,
    /// Names-only listings, filtered by naming convention before any
    /// metadata is fetched.
    NameOnly(NameFilter),
    /// Source files are spread over the source directory and an alternate
    /// directory (usually the server root).
    MultiDir {
        #[serde(default)]
        alternate_dir: String,
        #[serde(default)]
        alternate_prefixes: Vec<String>,
    },
}

/// Naming convention applied by [`DiffStrategy::NameOnly`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameFilter {
    /// Required file extension, compared case-insensitively.
    pub extension: String,
    /// Earliest year a dated file name may carry.
    pub since_year: i32,
    /// Earliest month within `since_year`.
    #[serde(default)]
    pub since_month: Option<u32>,
}

impl NameFilter {
    /// True when `name` has the expected extension and does not carry a date
    /// token older than the cutoff. Names without a date token are kept.
    pub fn accepts(&self, name: &str) -> bool {
        if !name
            .to_ascii_lowercase()
            .ends_with(&self.extension.to_ascii_lowercase())
        {
            return false;
        }
        match date_token(name) {
            None => true,
            Some((year, _)) if year != self.since_year => year > self.since_year,
            Some((_, Some(month))) => month >= self.since_month.unwrap_or(1),
            Some((_, None)) => true,
        }
    }
}

/// First year/month token in a file name.
///
/// Recognised tokens are whole `_`/`-`/`.` separated digit groups:
/// `YYYYMMDD` or `MMDDYYYY` (8 digits), `YYYYMM` or `MMYYYY` (6 digits) and
/// a bare `YYYY`.
pub fn date_token(name: &str) -> Option<(i32, Option<u32>)> {
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    stem.split(|c: char| matches!(c, '_' | '-' | '.'))
        .filter(|group| !group.is_empty() && group.bytes().all(|b| b.is_ascii_digit()))
        .find_map(parse_date_group)
}

fn parse_date_group(group: &str) -> Option<(i32, Option<u32>)> {
    let year = |s: &str| s.parse::<i32>().ok().filter(|y| (1900..=2100).contains(y));
    let month = |s: &str| s.parse::<u32>().ok().filter(|m| (1..=12).contains(m));
    match group.len() {
        8 => match (year(&group[..4]), month(&group[4..6])) {
            (Some(y), Some(m)) => Some((y, Some(m))),
            _ => Some((year(&group[4..])?, Some(month(&group[..2])?))),
        },
        6 => match (year(&group[..4]), month(&group[4..])) {
            (Some(y), Some(m)) => Some((y, Some(m))),
            _ => Some((year(&group[2..])?, Some(month(&group[..2])?))),
        },
        4 => Some((year(group)?, None)),
        _ => None,
    }
}

/// Only files modified within this window of "now" are synced. A zero
/// window disables the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecencyWindow(Duration);

impl RecencyWindow {
    pub fn unbounded() -> Self {
        Self(Duration::zero())
    }

    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn from_parts(days: i64, hours: i64, minutes: i64) -> Self {
        Self(Duration::days(days) + Duration::hours(hours) + Duration::minutes(minutes))
    }

    pub fn is_unbounded(&self) -> bool {
        self.0.is_zero()
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    /// True when `modified_at >= now - window`, or when the window is zero.
    pub fn admits(&self, modified_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.is_unbounded() || modified_at >= now - self.0
    }
}

impl Default for RecencyWindow {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn midwest_filter() -> NameFilter {
        NameFilter {
            extension: ".mrc".into(),
            since_year: 2024,
            since_month: Some(7),
        }
    }

    #[test]
    fn name_filter_requires_extension() {
        let filter = midwest_filter();
        assert!(filter.accepts("foo.mrc"));
        assert!(filter.accepts("FOO.MRC"));
        assert!(!filter.accepts("foo.txt"));
        assert!(!filter.accepts("foo.mrc.bak"));
    }

    #[test]
    fn name_filter_rejects_dates_before_cutoff() {
        let filter = midwest_filter();
        assert!(!filter.accepts("old_2023.mrc"));
        assert!(!filter.accepts("NYP_06012024_ALL_01.mrc"));
        assert!(filter.accepts("NYP_07012024_ALL_01.mrc"));
        assert!(filter.accepts("NYP_10012024_ALL_01.mrc"));
        assert!(filter.accepts("NYP_01012025_ALL_01.mrc"));
        assert!(filter.accepts("bar_2024.mrc"));
    }

    #[test]
    fn date_token_reads_common_layouts() {
        assert_eq!(date_token("NYP_10012024_ALL_01.mrc"), Some((2024, Some(10))));
        assert_eq!(date_token("orders-20240815.mrc"), Some((2024, Some(8))));
        assert_eq!(date_token("batch_202311.mrc"), Some((2023, Some(11))));
        assert_eq!(date_token("old_2023.mrc"), Some((2023, None)));
        assert_eq!(date_token("foo.mrc"), None);
        assert_eq!(date_token("file_01.mrc"), None);
    }

    #[test]
    fn alternate_prefixes_pick_alternate_dir() {
        let profile = VendorProfile::new(
            "bakertaylor_bpl",
            "bpl_src",
            "NSDROP/vendor_records/bakertaylor_bpl",
        )
        .with_diff(DiffStrategy::MultiDir {
            alternate_dir: String::new(),
            alternate_prefixes: vec!["ADD".into(), "NEW".into()],
        });
        assert_eq!(profile.source_dir_for("ADD_0101.mrc"), "");
        assert_eq!(profile.source_dir_for("NEW_0101.mrc"), "");
        assert_eq!(profile.source_dir_for("ORD_0101.mrc"), "bpl_src");
        assert_eq!(profile.name, "BAKERTAYLOR_BPL");
        assert_eq!(profile.connection, "bakertaylor_bpl");
    }

    #[test]
    fn metadata_profiles_always_use_source_dir() {
        let profile = VendorProfile::new("leila", "leila_src", "NSDROP/vendor_records/leila");
        assert_eq!(profile.source_dir_for("ADD_0101.mrc"), "leila_src");
    }

    #[test]
    fn recency_window_bounds() {
        let now = Utc::now();
        let window = RecencyWindow::from_parts(1, 2, 0);
        assert!(window.admits(now - Duration::hours(26), now));
        assert!(!window.admits(now - Duration::hours(26) - Duration::seconds(1), now));
        assert!(RecencyWindow::unbounded().admits(now - Duration::days(10_000), now));
        assert!(RecencyWindow::from_parts(0, 0, 0).is_unbounded());
    }

    #[test]
    fn diff_strategy_deserialises_from_tagged_yaml_shape() {
        let diff: DiffStrategy = serde_json::from_str(
            r#"{"strategy":"name_only","extension":".mrc","since_year":2024,"since_month":7}"#,
        )
        .unwrap();
        assert_eq!(diff, DiffStrategy::NameOnly(midwest_filter()));

        let diff: DiffStrategy =
            serde_json::from_str(r#"{"strategy":"multi_dir","alternate_prefixes":["ADD"]}"#).unwrap();
        assert_eq!(
            diff,
            DiffStrategy::MultiDir {
                alternate_dir: String::new(),
                alternate_prefixes: vec!["ADD".into()],
            }
        );
    }
}
