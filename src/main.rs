mod checks;
mod config;
mod pool;
mod report;
mod reporter;

use clap::Parser;
use config::Config;
use report::Report;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "servcheck")]
#[command(version)]
#[command(about = "Collect server health reports and send them to a monitoring site")]
struct Cli {
    /// Path to the INI configuration file
    #[arg(long, default_value = "/etc/servcheck.ini")]
    config: String,
    /// Increases log verbosity for each occurrence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Comma-separated list of checks, overriding enabled_checks
    #[arg(long)]
    checks: Option<String>,
    /// Do not POST the report, print it to stdout instead
    #[arg(long)]
    offline: bool,
    /// Print the report to stdout in addition to posting it
    #[arg(long)]
    print_reports: bool,
    /// Print the default configuration and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.print_default_config {
        println!("{}", Config::example_ini());
        return;
    }

    if !nix::unistd::Uid::effective().is_root() {
        warn!("not running as root, hardware checks will likely fail");
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, path = %cli.config, "could not load configuration");
            std::process::exit(2);
        }
    };
    if let Some(list) = &cli.checks {
        if let Err(err) = cfg.override_enabled_checks(list) {
            error!(error = %err, "invalid --checks value");
            std::process::exit(2);
        }
    }
    if cfg.enabled_checks.is_empty() {
        warn!("no checks enabled, the report will be empty");
    }

    info!(
        hostname = %cfg.hostname,
        checks = %cfg.enabled_checks.join(","),
        "starting check run"
    );

    let results = checks::run_enabled_checks(&cfg).await;
    let report = Report::new(cfg.hostname.clone(), results);

    if cli.offline || cli.print_reports {
        print!("{}", report.render_text());
    }

    if cli.offline {
        return;
    }

    match &cfg.post_url {
        Some(url) => {
            let client = match reporter::build_client() {
                Ok(client) => client,
                Err(err) => {
                    error!(error = %err, "could not build HTTP client, skipping delivery");
                    return;
                }
            };
            // delivery failure is logged, not fatal; the next scheduled run retries
            if let Err(err) = reporter::deliver(&client, url, &report).await {
                error!(error = %err, "report delivery failed");
            } else {
                info!("report delivered");
            }
        }
        None => warn!("post_url is not configured, skipping delivery"),
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
