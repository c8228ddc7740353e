use anyhow::{anyhow, Result};
use clap::Parser;
use clease::arg::Args;
use clease::{dispatch, exit_code};
use colored::Colorize;
use corelease::{LeaseManager, Settings};
use corelease_common::{
    configuration::get_configuration,
    log,
    telemetry::{get_subscriber, init_subscriber},
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings: Settings = get_configuration()?;
    args.apply(&mut settings.lease);

    // stdout carries command output, logs go to stderr
    let subscriber = get_subscriber(
        "clease".into(),
        settings.application.log_level.clone(),
        std::io::stderr,
    );
    init_subscriber(subscriber).map_err(|e| anyhow!(e))?;
    log!(debug, "{}", settings);

    let manager = match LeaseManager::new(&settings.lease) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(exit_code(e.kind()));
        }
    };

    let code = dispatch(args.command, manager).await?;
    std::process::exit(code);
}
