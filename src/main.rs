use clap::Parser;
use sip_ping::cli::Cli;
use sip_ping::config::{self, Config};
use sip_ping::generator::DEFAULT_REQUEST_TEMPLATE;
use sip_ping::probe::{run_from_config, StopReason};
use sip_ping::reporter::{write_json_summary, RunSummary};
use sip_ping::stats::StatsCollector;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if cli.print_template {
        eprintln!("{}", DEFAULT_REQUEST_TEMPLATE);
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let base = match cli.config.as_deref() {
        Some(path) => match config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("ERROR: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    let json_path = cli.json.clone();
    let cfg = cli.into_config(base);

    if let Err(errors) = cfg.validate() {
        for e in errors {
            eprintln!("ERROR: {}", e);
        }
        std::process::exit(1);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    }) {
        eprintln!("ERROR: Failed to set signal handler: {}", e);
        std::process::exit(1);
    }

    let report = match run_from_config(&cfg, shutdown).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    if let StopReason::Aborted(ref e) = report.stop {
        eprintln!("ERROR: {}", e);
    }
    if !cfg.quiet {
        StatsCollector::display_final_summary(&report.stats);
        if cfg.verbose {
            StatsCollector::display_details(&report.stats);
        }
    }

    if let Some(path) = json_path {
        let summary = RunSummary::from_snapshot(&report.stats, report.interrupted());
        match write_json_summary(&summary, &path) {
            Ok(()) => eprintln!("Results written to {}", path.display()),
            Err(e) => eprintln!("ERROR: Failed to write results: {}", e),
        }
    }

    if matches!(report.stop, StopReason::Aborted(_)) {
        std::process::exit(1);
    }
}
