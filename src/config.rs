use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "VIDSTORE_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Chunk size for new uploads, in bytes.
    pub chunk_size: usize,
    /// Longest wait for the next piece of a streamed payload.
    pub stream_idle_timeout: Duration,
    /// Base of the `videoUrl` links handed out by the listing endpoints.
    pub public_base_url: String,
    pub max_connections: u32,
}

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked video store with range streaming")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Settings shared by every subcommand. Each overrides its `VIDSTORE_*`
/// environment variable.
#[derive(Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// Host to bind to (overrides VIDSTORE_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides VIDSTORE_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Directory where chunk files are stored (overrides VIDSTORE_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides VIDSTORE_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Chunk size in bytes for new uploads (overrides VIDSTORE_CHUNK_SIZE)
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Seconds to wait for stream progress before dropping it
    /// (overrides VIDSTORE_STREAM_IDLE_TIMEOUT_SECS)
    #[arg(long, global = true)]
    pub stream_idle_timeout_secs: Option<u64>,

    /// Public base URL used in video links (overrides VIDSTORE_PUBLIC_BASE_URL)
    #[arg(long, global = true)]
    pub public_base_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Run migrations and exit
    Migrate,
    /// Upload every file listed in a JSON batch file
    Ingest {
        /// Path to the batch file
        batch: PathBuf,
        /// ffprobe binary used to measure durations
        #[arg(long, default_value = "ffprobe")]
        ffprobe: String,
        /// Skip probing; files without a duration get the default
        #[arg(long)]
        no_probe: bool,
        /// Remove every existing video and payload before the batch runs
        #[arg(long)]
        replace: bool,
    },
    /// Remove a video record together with its stored payload
    Remove {
        /// Video id to remove
        video_id: String,
    },
    /// Print catalog and storage totals
    Stats,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args(args: &GlobalArgs) -> Result<Self> {
        Self::from_sources(args, |key| env::var(key).ok())
    }

    /// Merge CLI args over values found through `lookup`, then defaults.
    pub fn from_sources(args: &GlobalArgs, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        let env_host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&var, "PORT")?.unwrap_or(3001);
        let env_storage = var("STORAGE_DIR").unwrap_or_else(|| "./data/chunks".into());
        let env_db =
            var("DATABASE_URL").unwrap_or_else(|| "sqlite://./data/meta/vidstore.db".into());
        let env_chunk = parse_var(&var, "CHUNK_SIZE")?.unwrap_or(1024 * 1024);
        let env_timeout = parse_var(&var, "STREAM_IDLE_TIMEOUT_SECS")?.unwrap_or(30);
        let env_max_conn = parse_var(&var, "MAX_CONNECTIONS")?.unwrap_or(5);

        let port = args.port.unwrap_or(env_port);
        let public_base_url = args
            .public_base_url
            .clone()
            .or_else(|| var("PUBLIC_BASE_URL"))
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let cfg = Self {
            host: args.host.clone().unwrap_or(env_host),
            port,
            storage_dir: args.storage_dir.clone().unwrap_or(env_storage),
            database_url: args.database_url.clone().unwrap_or(env_db),
            chunk_size: args.chunk_size.unwrap_or(env_chunk),
            stream_idle_timeout: Duration::from_secs(
                args.stream_idle_timeout_secs.unwrap_or(env_timeout),
            ),
            public_base_url,
            max_connections: env_max_conn,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk size must be greater than zero");
        }
        if self.stream_idle_timeout.is_zero() {
            bail!("stream idle timeout must be greater than zero");
        }
        if self.max_connections == 0 {
            bail!("max connections must be greater than zero");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {ENV_PREFIX}{} value `{}`", name, value)),
        None => Ok(None),
    }
}
