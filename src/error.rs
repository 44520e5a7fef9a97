//! Typed upload outcomes.

use std::io;

/// Why an upload did not complete.
///
/// Each pipeline step exits with its own variant; the `POST /` handler is the
/// single place that turns these into an HTTP response and the matching
/// counter updates.
#[derive(Debug)]
pub enum UploadReject {
    /// Missing file part, empty filename, disallowed extension, or a
    /// filename that would escape the storage root.
    Validation(&'static str),
    /// Admission gate tripped: storage usage above the cut-off.
    QuotaExceeded,
    /// Declared or streamed size above the hard per-request limit.
    TooLarge,
    /// I/O fault while estimating usage or persisting bytes.
    Storage(io::Error),
}

impl UploadReject {
    /// Status recorded in `http_requests_total` for this outcome.
    ///
    /// Flash-and-redirect outcomes count as 200, the too-large cutoff as 413
    /// and storage faults as 500.
    pub fn metric_status(&self) -> u16 {
        match self {
            UploadReject::Validation(_) | UploadReject::QuotaExceeded => 200,
            UploadReject::TooLarge => 413,
            UploadReject::Storage(_) => 500,
        }
    }
}
