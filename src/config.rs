use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "CONVERTER_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub scratch_dir: PathBuf,
    pub lifecycle: LifecycleConfig,
    pub max_upload_bytes: usize,
    pub pdfium_lib_dir: Option<PathBuf>,
}

/// Timings that drive the artifact lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// How long an undownloaded artifact stays redeemable.
    pub artifact_ttl: Duration,
    /// Delay between the start of a download and deletion of the file.
    pub download_grace: Duration,
    /// Background sweep cadence; `None` disables the periodic sweeper.
    pub sweep_interval: Option<Duration>,
    /// Sweep synchronously before every redeem.
    pub sweep_on_download: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            artifact_ttl: Duration::from_secs(600),
            download_grace: Duration::from_secs(30),
            sweep_interval: Some(Duration::from_secs(60)),
            sweep_on_download: true,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "One-time-download PNG/JPEG <-> PDF converter")]
pub struct Args {
    /// Host to bind to (overrides CONVERTER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CONVERTER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Root for per-request scratch directories (overrides CONVERTER_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Seconds an undownloaded artifact stays available (overrides CONVERTER_ARTIFACT_TTL_SECS)
    #[arg(long)]
    pub artifact_ttl_secs: Option<u64>,

    /// Seconds between download start and deletion (overrides CONVERTER_DOWNLOAD_GRACE_SECS)
    #[arg(long)]
    pub download_grace_secs: Option<u64>,

    /// Seconds between background sweeps, 0 to disable (overrides CONVERTER_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Sweep expired artifacts before each download (overrides CONVERTER_SWEEP_ON_DOWNLOAD)
    #[arg(long)]
    pub sweep_on_download: Option<bool>,

    /// Maximum accepted upload size in bytes (overrides CONVERTER_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Directory containing the pdfium shared library (overrides CONVERTER_PDFIUM_LIB_DIR)
    #[arg(long)]
    pub pdfium_lib_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse(), |key| env::var(key))
    }

    /// Merge parsed arguments over values looked up through `lookup`.
    fn from_args<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let defaults = LifecycleConfig::default();
        let var = |name: &str| read_var(&lookup, name);

        let host = match args.host {
            Some(host) => host,
            None => var("HOST")?.unwrap_or_else(|| "0.0.0.0".into()),
        };
        let port = pick(args.port, &var, "PORT", 8000)?;
        let scratch_dir = match args.scratch_dir {
            Some(dir) => dir,
            None => var("SCRATCH_DIR")?
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join("png-pdf-converter")),
        };
        let artifact_ttl = pick(
            args.artifact_ttl_secs,
            &var,
            "ARTIFACT_TTL_SECS",
            defaults.artifact_ttl.as_secs(),
        )?;
        let download_grace = pick(
            args.download_grace_secs,
            &var,
            "DOWNLOAD_GRACE_SECS",
            defaults.download_grace.as_secs(),
        )?;
        let sweep_interval = pick(args.sweep_interval_secs, &var, "SWEEP_INTERVAL_SECS", 60)?;
        let sweep_on_download = pick(
            args.sweep_on_download,
            &var,
            "SWEEP_ON_DOWNLOAD",
            defaults.sweep_on_download,
        )?;
        let max_upload_bytes = pick(args.max_upload_bytes, &var, "MAX_UPLOAD_BYTES", 20 << 20)?;
        let pdfium_lib_dir = match args.pdfium_lib_dir {
            Some(dir) => Some(dir),
            None => var("PDFIUM_LIB_DIR")?.map(PathBuf::from),
        };

        if artifact_ttl == 0 {
            anyhow::bail!("artifact TTL must be at least one second");
        }

        Ok(Self {
            host,
            port,
            scratch_dir,
            lifecycle: LifecycleConfig {
                artifact_ttl: Duration::from_secs(artifact_ttl),
                download_grace: Duration::from_secs(download_grace),
                sweep_interval: (sweep_interval > 0).then(|| Duration::from_secs(sweep_interval)),
                sweep_on_download,
            },
            max_upload_bytes,
            pdfium_lib_dir,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read `CONVERTER_<name>`; absent variables are `None`, unreadable ones an error.
fn read_var<F>(lookup: &F, name: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Result<String, env::VarError>,
{
    let key = format!("{}{}", ENV_PREFIX, name);
    match lookup(&key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

/// CLI value, else parsed environment value, else `default`.
fn pick<T, V>(cli: Option<T>, var: &V, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    V: Fn(&str) -> Result<Option<String>>,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match var(name)? {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, name, raw)),
        None => Ok(default),
    }
}
