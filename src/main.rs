mod cli;

use log::info;
use pincushion::{Archive, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli::build_cli().get_matches();
    let log_level = matches.get_one::<String>("log-level").cloned();

    cli::init_logging(log_level.as_deref());

    if matches.get_flag("version") {
        println!("pincushion {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let cfg = Config::from_env(cli::overrides(&matches))?;
    info!(
        "Archiving to {} (throttle={}, concurrency={})",
        cfg.directory.display(),
        cfg.throttle,
        cfg.concurrency
    );
    let mut archive = Archive::from_config(&cfg)?;
    let report = archive.sync().await?;
    if report.images.failed > 0 {
        info!("{} images could not be downloaded", report.images.failed);
    }
    Ok(())
}
