use std::{error::Error, path::Path};

use clap::Parser;
use log::{info, warn};
use warehouse_report::{
    config::ReportConfig,
    report::{pipeline::run, render::ChromeRenderer},
    utils::send_email::{GmailNotifier, Notifier},
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Exit with an error if the report of any warehouse failed
    #[arg(long)]
    strict: bool,
}

/// Run this job from cron, one image per warehouse ends up in the output dir
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let env_file = format!(".env/{}.env", args.env);
    match dotenvy::from_path(Path::new(&env_file)) {
        Ok(_) => info!("Loaded environment from {}", env_file),
        Err(e) => warn!("Can't load {}: {}, using the process environment", env_file, e),
    }

    let config = ReportConfig::from_env()?;
    let renderer = ChromeRenderer {
        bin: config.chrome_bin.clone(),
        width: config.screenshot_width,
        height: config.screenshot_height,
    };
    let notifier = config.notifier.clone().map(GmailNotifier::new);
    if notifier.is_none() {
        info!("No email configuration found, emails are disabled");
    }

    let summary = run(
        &config,
        &renderer,
        notifier.as_ref().map(|n| n as &dyn Notifier),
    )
    .await?;

    for (name, e) in summary.failures() {
        warn!("No report for {}: {}", name, e);
    }
    if args.strict && !summary.is_success() {
        return Err(format!(
            "{} of {} warehouses failed",
            summary.failed(),
            summary.outcomes.len()
        )
        .into());
    }

    Ok(())
}
