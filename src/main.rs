#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;
use std::process::ExitCode;

use alert_migrate::migrate::commands::{CollectRequest, run_collect, run_extract, run_restore};
use alert_migrate::migrate::config::{DEFAULT_CONFIG_FILE, MigrateConfig, Overrides};
use alert_migrate::migrate::document::DocumentKind;
use alert_migrate::migrate::error::MigrateError;
use alert_migrate::migrate::restorer::RestoreSelector;
use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "alert-migrate")]
#[command(about = "Copy alert and report definitions between devices through SSH tunnels")]
#[command(version)]
struct Cli {
    /// Configuration file ([source_device], [destination_device], [settings])
    #[arg(short, long, global = true, env = "MIGRATE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory artifacts are written to and restored from
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Seconds allowed for SSH connect and authentication
    #[arg(long, global = true, value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// Seconds allowed for each store request through the tunnel
    #[arg(long, global = true, value_name = "SECS")]
    request_timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture alerts and reports from the source device
    Collect {
        /// Keep only alert definitions (drop store metadata and audit fields)
        #[arg(long)]
        alerts_definitions: bool,

        /// Keep only report definitions
        #[arg(long)]
        reports_definitions: bool,

        /// Collect a single kind
        #[arg(long, value_enum)]
        only: Option<KindArg>,
    },

    /// Replay captured artifacts into the destination device
    #[command(long_about = r#"
Replay captured artifacts into the destination device.

Without any selector the newest alerts and reports captures in the output
directory are restored. A bare file name is looked up in the output
directory; anything containing a path separator is used as given.

EXAMPLES:
  alert-migrate restore --alerts
  alert-migrate restore --reports reports_20240101_120000.json
  alert-migrate restore --file /backups/export.json --kind alerts
"#)]
    Restore {
        /// Restore alerts, optionally from FILE (newest capture otherwise)
        #[arg(short, long, num_args = 0..=1, value_name = "FILE")]
        alerts: Option<Option<String>>,

        /// Restore reports, optionally from FILE (newest capture otherwise)
        #[arg(short, long, num_args = 0..=1, value_name = "FILE")]
        reports: Option<Option<String>>,

        /// Restore one specific artifact file
        #[arg(short, long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Kind held by --file when its name does not tell
        #[arg(long, value_enum, requires = "file")]
        kind: Option<KindArg>,
    },

    /// Write a definitions-only artifact from a full capture, offline
    Extract {
        /// Full alerts capture to reduce
        #[arg(long, value_name = "FILE", conflicts_with = "reports", required_unless_present = "reports")]
        alerts: Option<PathBuf>,

        /// Full reports capture to reduce
        #[arg(long, value_name = "FILE")]
        reports: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    #[value(alias = "alert")]
    Alerts,
    #[value(alias = "report")]
    Reports,
}

impl From<KindArg> for DocumentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Alerts => DocumentKind::Alert,
            KindArg::Reports => DocumentKind::Report,
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            output_dir: self.output_dir.clone(),
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
        }
    }
}

fn print_summary(lines: &[String]) {
    println!();
    for line in lines {
        println!("{}", line);
    }
}

/// Run the selected command. `Ok(false)` means it completed with failures.
async fn run(cli: Cli) -> Result<bool, MigrateError> {
    let config = MigrateConfig::load(&cli.config)?;
    let settings = config.resolve(&cli.overrides());

    match cli.command {
        Command::Collect {
            alerts_definitions,
            reports_definitions,
            only,
        } => {
            let request = CollectRequest {
                only: only.map(DocumentKind::from),
                alerts_definitions,
                reports_definitions,
            };
            let outcome = run_collect(&config, &settings, &request).await?;
            print_summary(&outcome.summary());
            Ok(outcome.is_success())
        }
        Command::Restore {
            alerts,
            reports,
            file,
            kind,
        } => {
            let mut selectors = Vec::new();
            if let Some(file) = alerts {
                selectors.push(RestoreSelector::Alerts(file));
            }
            if let Some(file) = reports {
                selectors.push(RestoreSelector::Reports(file));
            }
            if let Some(path) = file {
                selectors.push(RestoreSelector::File {
                    path,
                    kind: kind.map(DocumentKind::from),
                });
            }

            let outcome = run_restore(&config, &settings, &selectors).await?;
            print_summary(&outcome.summary());
            Ok(outcome.is_success())
        }
        Command::Extract { alerts, reports } => {
            let (kind, input) = match (alerts, reports) {
                (Some(input), _) => (DocumentKind::Alert, input),
                (None, Some(input)) => (DocumentKind::Report, input),
                (None, None) => {
                    return Err(MigrateError::Config(
                        "extract needs --alerts FILE or --reports FILE".to_string(),
                    ));
                }
            };
            let outcome = run_extract(kind, &input, &settings).await?;
            print_summary(&outcome.summary());
            Ok(outcome.is_success())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(true) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            error!("Completed with failures");
            ExitCode::from(EXIT_FAILURE)
        }
        Err(MigrateError::Interrupted) => {
            error!("Interrupted; tunnel closed");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
