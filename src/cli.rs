//! Command-line argument parsing for querygate.

use clap::Parser;
use querygate::config::{BackendConfig, Config};
use std::path::PathBuf;

/// Backend name used for a CSV directory given on the command line.
const CLI_CSV_BACKEND: &str = "csv";

/// A read-only multi-backend SQL gateway with active-run file access.
#[derive(Parser, Debug)]
#[command(name = "querygate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, env = "QUERYGATE_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g., 127.0.0.1:8000)
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Directory the worker writes run directories into
    #[arg(short, long, value_name = "DIR")]
    pub outputs_dir: Option<PathBuf>,

    /// Directory of CSV files to expose as the `csv` backend
    #[arg(long, value_name = "DIR")]
    pub csv_dir: Option<PathBuf>,

    /// Write logs to the state directory instead of stderr
    #[arg(long)]
    pub log_to_file: bool,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }

    /// Applies command-line overrides, which take precedence over the
    /// config file and the environment.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(dir) = &self.outputs_dir {
            config.runs.outputs_dir = dir.clone();
        }
        if let Some(dir) = &self.csv_dir {
            config.backends.insert(
                CLI_CSV_BACKEND.to_string(),
                BackendConfig::Directory { path: dir.clone() },
            );
        }
    }
}
