use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use csw_client::EndpointOptions;
use csw_core::{AppError, CompatOptionSet, HarvestConfig, HarvestSchema, HttpConfig};

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "csw")]
#[command(
    author,
    version,
    about = "Harvest metadata records from OGC Catalog Service (CSW) endpoints"
)]
#[command(after_help = "Examples:
  csw inspect https://www.geopicardie.fr/geonetwork/srv/fre/csw
  csw harvest https://www.geopicardie.fr/geonetwork/srv/fre/csw --schema iso --display list
  csw harvest --catalog geopicardie --cache previous.json --save-cache current.json
  csw harvest > reports.json")]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch the capabilities of a CSW service and print them as JSON
    Inspect {
        /// URL of the CSW service
        #[arg(value_name = "URL")]
        url: String,

        /// Log every request URL
        #[arg(long)]
        log_all_requests: bool,
    },
    /// Harvest records from CSW services
    #[command(after_help = "Examples:
  csw harvest                                 # Harvest all enabled catalogs from config
  csw harvest https://example.org/csw         # Harvest a single URL
  csw harvest --catalog geopicardie           # Harvest a catalog by name from config
  csw harvest --config ~/custom.toml          # Use custom config file")]
    Harvest(HarvestArgs),
}

/// How harvested records are shown while harvesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DisplayMode {
    /// Log progress after every page
    Progress,
    /// Print one line per record
    List,
    /// Only print the final report
    #[value(name = "none")]
    Quiet,
}

#[derive(Args, Debug)]
pub struct HarvestArgs {
    /// URL of a single CSW service to harvest
    #[arg(value_name = "URL")]
    pub url: Option<String>,

    /// Harvest a specific catalog by name from config file
    #[arg(long, value_name = "NAME", conflicts_with = "url")]
    pub catalog: Option<String>,

    /// Custom path to catalogs.toml configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Metadata schema to harvest: dc, iso (alias inspire) or both
    #[arg(long, value_name = "SCHEMA")]
    pub schema: Option<HarvestSchema>,

    /// Maximum number of page requests in flight
    #[arg(long, env = "CSW_CONCURRENCY", default_value_t = 2)]
    pub concurrency: usize,

    /// Number of records requested per page
    #[arg(long, default_value_t = 20)]
    pub step: u64,

    /// Abort after this many milliseconds without network activity
    #[arg(long, value_name = "MS", default_value_t = 20_000)]
    pub timeout: u64,

    /// Timeout of a single HTTP request, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    pub request_timeout: u64,

    /// Compatibility option to enable from the start (repeatable)
    #[arg(long = "compat", value_name = "OPTION")]
    pub compat: Vec<String>,

    /// Display mode
    #[arg(long, value_enum, default_value_t = DisplayMode::Progress)]
    pub display: DisplayMode,

    /// Log every request URL
    #[arg(long)]
    pub log_all_requests: bool,

    /// Snapshot of a previous harvest ({"originalId": "contentHash"})
    #[arg(long, value_name = "FILE")]
    pub cache: Option<PathBuf>,

    /// Write the snapshot of this harvest when it succeeds
    #[arg(long, value_name = "FILE")]
    pub save_cache: Option<PathBuf>,
}

impl HarvestArgs {
    /// Session configuration for one target.
    pub fn harvest_config(&self, schema: HarvestSchema) -> HarvestConfig {
        HarvestConfig {
            schema,
            concurrency: self.concurrency,
            step: self.step,
            activity_timeout: Duration::from_millis(self.timeout),
        }
    }

    /// Endpoint options for one target.
    pub fn endpoint_options(&self, compat_options: CompatOptionSet) -> EndpointOptions {
        EndpointOptions {
            http: HttpConfig {
                timeout: Duration::from_secs(self.request_timeout),
                ..HttpConfig::default()
            },
            extra_params: Vec::new(),
            compat_options,
            log_requests: self.log_all_requests,
        }
    }

    /// Compatibility options given on the command line.
    pub fn compat_options(&self) -> Result<CompatOptionSet, AppError> {
        CompatOptionSet::from_names(&self.compat)
    }
}
