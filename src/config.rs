//! CLI arguments and upload policy constants.

use clap::Parser;

/// Hard per-request size ceiling. Requests declaring or streaming more than
/// this are refused before the admission gate ever runs.
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;
/// Soft storage capacity used for the usage ratio, intentionally above the
/// per-request ceiling so a single maximal upload still fits.
pub const DEFAULT_CAPACITY_BYTES: u64 = 150 * 1024 * 1024;
/// Usage percentage above which new uploads are refused. The boundary is
/// exclusive: exactly this value is still admitted.
pub const ADMIT_MAX_PERCENT: f64 = 80.0;
/// Usage percentage above which the estimator logs a warning. Informational
/// only, never blocks an upload.
pub const USAGE_WARN_PERCENT: f64 = 70.0;
/// Extensions accepted for upload, matched case-insensitively against the
/// suffix after the last dot.
pub const ALLOWED_EXTENSIONS: [&str; 6] = ["txt", "pdf", "png", "jpg", "jpeg", "gif"];
pub const FLASH_COOKIE_NAME: &str = "DROPSPOT_FLASH";

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(
    name = "dropspot",
    version,
    about = "Quota-gated file upload server with Prometheus metrics"
)]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "DROPSPOT_STORAGE_DIR",
        default_value = "uploads",
        help = "Storage directory for uploaded files"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "DROPSPOT_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "DROPSPOT_PORT",
        default_value_t = 5000,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "DROPSPOT_CAPACITY_BYTES",
        default_value_t = DEFAULT_CAPACITY_BYTES,
        help = "Soft storage capacity in bytes for the usage ratio"
    )]
    pub capacity_bytes: u64,
    #[arg(
        long,
        env = "DROPSPOT_MAX_UPLOAD_BYTES",
        default_value_t = MAX_UPLOAD_BYTES,
        help = "Hard per-request upload size limit in bytes"
    )]
    pub max_upload_bytes: u64,
    #[arg(
        long,
        env = "DROPSPOT_CORS_ORIGINS",
        help = "Comma separated CORS origins"
    )]
    pub cors_origins: Option<String>,
}
