use std::convert::TryFrom;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use url::Url;

use relaysave::config::Settings;
use relaysave::sink::SinkMode;

#[derive(Parser, Debug, Clone)]
#[command(name = "relaysave", author, version, about = "Stage remote files and save them into configured storages", long_about = None)]
pub struct Cli {
    /// Remote file URL(s); each one becomes a transfer task
    #[arg(value_name = "url", required = true)]
    pub urls: Vec<String>,

    /// Configuration file (defaults to ./config.toml when present)
    #[arg(long = "config", value_name = "path")]
    pub config: Option<PathBuf>,

    /// Destination storage name
    #[arg(short = 's', long = "storage", value_name = "name")]
    pub storage: Option<String>,

    /// Destination directory inside the storage
    #[arg(short = 'p', long = "path", value_name = "dir", default_value = "")]
    pub path: String,

    /// Concurrent transfer workers
    #[arg(long = "workers", value_name = "int")]
    pub workers: Option<usize>,

    /// Save retries after the first attempt
    #[arg(long = "retry", value_name = "int")]
    pub retry: Option<usize>,

    /// Download thread cap for large files
    #[arg(long = "threads", value_name = "int")]
    pub threads: Option<usize>,

    /// Staging directory for partial downloads
    #[arg(long = "cache-dir", value_name = "path")]
    pub cache_dir: Option<PathBuf>,

    /// Seconds to keep staged files after a transfer (0 deletes at once)
    #[arg(long = "cache-ttl", value_name = "secs")]
    pub cache_ttl: Option<i64>,

    /// Per-request timeout in seconds
    #[arg(long = "timeout", value_name = "secs")]
    pub timeout: Option<u64>,

    /// Quiet mode
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Verbose mode
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Stream progress updates as newline-delimited JSON
    #[arg(long = "json", action = ArgAction::SetTrue)]
    pub json: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// Everything `main` needs to run a batch of transfers.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub urls: Vec<Url>,
    pub settings: Settings,
    pub storage: String,
    pub dest_dir: String,
    pub timeout: Option<Duration>,
    pub progress: SinkMode,
}

impl RunConfig {
    /// Destination path for a file named `file_name`.
    pub fn storage_path(&self, file_name: &str) -> String {
        let dir = self.dest_dir.trim_end_matches('/');
        if dir.is_empty() {
            file_name.to_string()
        } else {
            format!("{dir}/{file_name}")
        }
    }
}

impl TryFrom<Cli> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        if cli.urls.is_empty() {
            return Err(anyhow!("at least one URL is required"));
        }

        let mut urls = vec![];
        for url in &cli.urls {
            let parsed = Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(anyhow!("unsupported URL scheme: {}", parsed.scheme()));
            }
            urls.push(parsed);
        }

        let mut settings = Settings::load_or_default(cli.config.as_deref())?;
        // non-UTF-8 variables cannot name a RELAYSAVE_ key
        settings.apply_env(std::env::vars_os().filter_map(|(key, value)| {
            Some((key.into_string().ok()?, value.into_string().ok()?))
        }))?;
        if let Some(workers) = cli.workers {
            settings.workers = workers;
        }
        if let Some(retry) = cli.retry {
            settings.retry = retry;
        }
        if let Some(threads) = cli.threads {
            settings.threads = threads;
        }
        if let Some(dir) = cli.cache_dir.clone() {
            settings.temp.base_path = dir;
        }
        if let Some(ttl) = cli.cache_ttl {
            settings.temp.cache_ttl = ttl;
        }
        settings.validate().context("invalid configuration")?;

        let enabled: Vec<&str> = settings
            .storages
            .iter()
            .filter(|storage| storage.enable)
            .map(|storage| storage.name.as_str())
            .collect();
        let storage = match cli.storage.clone() {
            Some(name) if enabled.contains(&name.as_str()) => name,
            Some(name) => return Err(anyhow!("no enabled storage named {name:?}")),
            None => enabled
                .first()
                .map(|name| name.to_string())
                .ok_or_else(|| anyhow!("no storage is enabled"))?,
        };

        let progress = if cli.json {
            SinkMode::Json
        } else if cli.quiet {
            SinkMode::Quiet
        } else {
            SinkMode::Text
        };

        Ok(RunConfig {
            urls,
            settings,
            storage,
            dest_dir: cli.path,
            timeout: cli.timeout.map(Duration::from_secs),
            progress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Result<RunConfig> {
        let mut full = vec!["relaysave"];
        full.extend_from_slice(args);
        RunConfig::try_from(Cli::try_parse_from(full).expect("cli parse"))
    }

    fn config_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn progress_mode_defaults_to_text() {
        let file = config_file("");
        let path = file.path().to_str().unwrap();
        let config = parse(&["--config", path, "https://example.com/file"]).expect("config");
        assert_eq!(config.progress, SinkMode::Text);
    }

    #[test]
    fn progress_mode_prefers_json_flag() {
        let file = config_file("");
        let path = file.path().to_str().unwrap();
        let config = parse(&["--config", path, "-q", "--json", "https://example.com/f"])
            .expect("config");
        assert_eq!(config.progress, SinkMode::Json);
    }

    #[test]
    fn flags_override_file_values() {
        let file = config_file("workers = 8\nretry = 5\n[temp]\ncache_ttl = 60\n");
        let path = file.path().to_str().unwrap();
        let config = parse(&[
            "--config",
            path,
            "--retry",
            "2",
            "--cache-ttl",
            "0",
            "https://example.com/f",
        ])
        .expect("config");
        assert_eq!(config.settings.workers, 8);
        assert_eq!(config.settings.retry, 2);
        assert_eq!(config.settings.temp.cache_ttl, 0);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let file = config_file("");
        let path = file.path().to_str().unwrap();
        assert!(parse(&["--config", path, "--workers", "0", "https://example.com/f"]).is_err());
    }

    #[test]
    fn storage_defaults_to_first_enabled() {
        let file = config_file(
            "[[storages]]\nname = \"cold\"\nbase_path = \"cold\"\nenable = false\n\n\
             [[storages]]\nname = \"warm\"\nbase_path = \"warm\"\n",
        );
        let path = file.path().to_str().unwrap();
        let config = parse(&["--config", path, "https://example.com/f"]).expect("config");
        assert_eq!(config.storage, "warm");
        assert!(parse(&["--config", path, "-s", "cold", "https://example.com/f"]).is_err());
    }

    #[test]
    fn rejects_non_http_urls() {
        let file = config_file("");
        let path = file.path().to_str().unwrap();
        assert!(parse(&["--config", path, "ftp://example.com/f"]).is_err());
    }

    #[test]
    fn storage_path_joins_destination_dir() {
        let file = config_file("");
        let path = file.path().to_str().unwrap();
        let config = parse(&["--config", path, "-p", "media/", "https://example.com/f"])
            .expect("config");
        assert_eq!(config.storage_path("a.mp4"), "media/a.mp4");
        let config = parse(&["--config", path, "https://example.com/f"]).expect("config");
        assert_eq!(config.storage_path("a.mp4"), "a.mp4");
    }
}
