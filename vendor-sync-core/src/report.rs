//! Publishing validation tables to the reporting sink.

use tracing::{debug, info, warn};

use crate::contract::{AppendOutcome, ReportSink, SinkError};
use crate::validate::ValidationTable;

/// Which range family of the sink receives the rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportTarget {
    #[default]
    Production,
    Test,
}

/// Sink range for a vendor code, e.g. `EVP!A1:O10000` or `EVPTest!A1:O10000`.
pub fn report_range(vendor_code: &str, target: ReportTarget) -> String {
    match target {
        ReportTarget::Production => format!("{vendor_code}!A1:O10000"),
        ReportTarget::Test => format!("{vendor_code}Test!A1:O10000"),
    }
}

pub struct ReportPublisher<'a> {
    sink: &'a dyn ReportSink,
    target: ReportTarget,
}

impl<'a> ReportPublisher<'a> {
    pub fn new(sink: &'a dyn ReportSink, target: ReportTarget) -> Self {
        Self { sink, target }
    }

    pub fn target(&self) -> ReportTarget {
        self.target
    }

    /// Appends the table's rows to the range of its vendor code.
    ///
    /// Returns `Ok(None)` when there is nothing to publish, or when the sink
    /// timed out, rejected the credentials or reported an error; those are
    /// logged with the vendor and file. [`SinkError::Other`] is returned to
    /// the caller.
    pub async fn publish(
        &self,
        table: &ValidationTable,
    ) -> Result<Option<AppendOutcome>, SinkError> {
        if table.is_empty() {
            debug!(file = %table.file_name(), "[REPORT] No rows to publish");
            return Ok(None);
        }
        let range = report_range(table.vendor_code(), self.target);
        match self.sink.append(&range, table.to_rows()).await {
            Ok(outcome) => {
                info!(
                    vendor_code = %table.vendor_code(),
                    file = %table.file_name(),
                    range = %range,
                    updated_rows = outcome.updated_rows,
                    "[REPORT] Appended validation rows"
                );
                Ok(Some(outcome))
            }
            Err(e) if e.is_absorbable() => {
                warn!(
                    vendor_code = %table.vendor_code(),
                    file = %table.file_name(),
                    range = %range,
                    kind = e.kind(),
                    error = %e,
                    "[REPORT][ERROR] Error occurred while sending data to google sheet"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
