use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr};

/// Upper bound on the artifact TTL (a century); expiry arithmetic stays in range.
pub const MAX_TTL_HOURS: i64 = 24 * 365 * 100;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Lifetime of uploads and produced documents.
    pub ttl_hours: i64,
    /// Replaces the built-in password dictionary when set.
    pub password_file: Option<PathBuf>,
    /// Background sweep period; `0` disables the sweeper.
    pub sweep_interval_secs: u64,
    pub max_entry_bytes: u64,
    pub body_limit_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Converts image archives into PDF documents")]
pub struct Args {
    /// Host to bind to (overrides ZIP2PDF_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides ZIP2PDF_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where payloads are stored (overrides ZIP2PDF_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides ZIP2PDF_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Hours before uploads and documents expire (overrides ZIP2PDF_TTL_HOURS)
    #[arg(long)]
    pub ttl_hours: Option<i64>,

    /// Password dictionary, one per line (overrides ZIP2PDF_PASSWORD_FILE)
    #[arg(long)]
    pub password_file: Option<PathBuf>,

    /// Seconds between background sweeps, 0 to disable (overrides ZIP2PDF_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Largest uncompressed archive entry accepted (overrides ZIP2PDF_MAX_ENTRY_BYTES)
    #[arg(long)]
    pub max_entry_bytes: Option<u64>,

    /// Largest request body accepted (overrides ZIP2PDF_BODY_LIMIT_BYTES)
    #[arg(long)]
    pub body_limit_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge `args` over `ZIP2PDF_*` variables over defaults.
    pub fn from_args(args: Args) -> Result<Self> {
        let env_host = env::var("ZIP2PDF_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_storage =
            env::var("ZIP2PDF_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("ZIP2PDF_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/zip2pdf.db".into());
        let env_password_file = env::var_os("ZIP2PDF_PASSWORD_FILE").map(PathBuf::from);

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: or_env(args.port, "ZIP2PDF_PORT", 3000)?,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            ttl_hours: or_env(args.ttl_hours, "ZIP2PDF_TTL_HOURS", 24)?,
            password_file: args.password_file.or(env_password_file),
            sweep_interval_secs: or_env(
                args.sweep_interval_secs,
                "ZIP2PDF_SWEEP_INTERVAL_SECS",
                0,
            )?,
            max_entry_bytes: or_env(
                args.max_entry_bytes,
                "ZIP2PDF_MAX_ENTRY_BYTES",
                256 * 1024 * 1024,
            )?,
            body_limit_bytes: or_env(
                args.body_limit_bytes,
                "ZIP2PDF_BODY_LIMIT_BYTES",
                512 * 1024 * 1024,
            )?,
        };

        if !(1..=MAX_TTL_HOURS).contains(&cfg.ttl_hours) {
            anyhow::bail!(
                "ttl must be between 1 and {} hours, got {}",
                MAX_TTL_HOURS,
                cfg.ttl_hours
            );
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CLI value, else the parsed environment variable, else `default`.
fn or_env<T>(cli: Option<T>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_win() {
        let args = Args::parse_from([
            "zip2pdf",
            "--host",
            "127.0.0.1",
            "--port",
            "8081",
            "--storage-dir",
            "/tmp/objects",
            "--database-url",
            "sqlite::memory:",
            "--ttl-hours",
            "2",
            "--sweep-interval-secs",
            "60",
            "--max-entry-bytes",
            "1024",
            "--body-limit-bytes",
            "2048",
            "--password-file",
            "/etc/zip2pdf/passwords.txt",
        ]);
        let cfg = AppConfig::from_args(args).unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:8081");
        assert_eq!(cfg.ttl_hours, 2);
        assert_eq!(cfg.sweep_interval_secs, 60);
        assert_eq!(cfg.max_entry_bytes, 1024);
        assert_eq!(cfg.body_limit_bytes, 2048);
        assert_eq!(
            cfg.password_file.as_deref(),
            Some(std::path::Path::new("/etc/zip2pdf/passwords.txt"))
        );
    }

    #[test]
    fn non_positive_ttl_is_rejected() {
        let args = Args::parse_from(["zip2pdf", "--ttl-hours", "0"]);
        assert!(AppConfig::from_args(args).is_err());
    }

    #[test]
    fn oversized_ttl_is_rejected() {
        let args = Args::parse_from(["zip2pdf", "--ttl-hours", "10000000000"]);
        let err = AppConfig::from_args(args).unwrap_err();
        assert!(err.to_string().contains("ttl must be between"), "{err}");

        let max = MAX_TTL_HOURS.to_string();
        let args = Args::parse_from(["zip2pdf", "--ttl-hours", max.as_str()]);
        let cfg = AppConfig::from_args(args).unwrap();
        // the largest accepted TTL still stamps a representable expiry
        assert!(chrono::Utc::now()
            .checked_add_signed(chrono::Duration::hours(cfg.ttl_hours))
            .is_some());
    }
}
