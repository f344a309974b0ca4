use anyhow::{bail, Context};
use bmsread::config::Cli;
use bmsread::{logging, BluestTransport, Config, JsonPublisher, Poller, Shutdown};
use clap::Parser;
use log::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load(Cli::parse())?;
    logging::init_logger(&config.log_level);

    let transport = BluestTransport::new()
        .await
        .context("Failed to open the bluetooth adapter")?;
    let publisher = JsonPublisher::stdout(&config.vendor, &config.base_topic);
    let mut poller = Poller::new(transport, publisher, config.devices.clone(), config.interval);

    let (trigger, shutdown) = Shutdown::new();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Signal received. Shutting down.");
        trigger.trigger();
    });

    if config.once {
        let summary = poller.poll_once(&shutdown).await;
        if summary.published == 0 {
            bail!("No data read from any of {} batteries", config.devices.len());
        }
        return Ok(());
    }

    poller.run(shutdown).await;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
