//! Inspection of image build output.
//!
//! A build can finish without a transport error and still have failed: the
//! failure is only visible as an error record in the output, usually the
//! final one.

use crate::core::types::BuildRecord;

/// Returns the build failure encoded in the output, if any.
///
/// The final record is checked first. Earlier records are still scanned
/// because some builders keep streaming cleanup output after the failing step.
/// Empty output is treated as a failure.
pub fn build_failure(records: &[BuildRecord]) -> Option<String> {
    let Some(last) = records.last() else {
        return Some("build produced no output".to_string());
    };
    if let Some(message) = record_error(last) {
        return Some(message);
    }
    records.iter().find_map(record_error)
}

fn record_error(record: &BuildRecord) -> Option<String> {
    if let Some(error) = record.error.as_deref()
        && !error.trim().is_empty()
    {
        return Some(error.trim().to_string());
    }
    record
        .error_detail
        .as_ref()
        .and_then(|detail| detail.message.as_deref())
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

/// Progress text of a record, without the trailing newline builders append.
pub fn progress_text(record: &BuildRecord) -> Option<&str> {
    record
        .stream
        .as_deref()
        .map(str::trim_end)
        .filter(|text| !text.is_empty())
}
