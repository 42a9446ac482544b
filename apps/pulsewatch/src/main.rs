mod cli;

use anyhow::{bail, Context, Result};
use pulsewatch_core::notify::{GraphMailer, LogNotifier, Notifier};
use pulsewatch_core::transport::{AdbTransport, LocalDirTransport, RemoteTransport};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = cli::parse_args();
    let config = pulsewatch_config::load_config(&args.config_path)
        .with_context(|| format!("failed to load config {}", args.config_path.display()))?;

    let transport: Arc<dyn RemoteTransport> = match config.transport.method.as_str() {
        "adb" => Arc::new(
            AdbTransport::new(&config.transport)
                .context("failed to initialize adb transport")?,
        ),
        "local" => Arc::new(LocalDirTransport::new(&config.transport.local_root)),
        other => bail!("unsupported transport method `{other}`; expected one of: adb, local"),
    };

    let notifier: Arc<dyn Notifier> = match config.alert.method.as_str() {
        "graph" => Arc::new(
            GraphMailer::new(config.alert.graph.clone())
                .context("failed to initialize graph mailer")?,
        ),
        "log" => Arc::new(LogNotifier),
        other => bail!("unsupported alert method `{other}`; expected one of: graph, log"),
    };

    pulsewatch_core::run_monitor(config, transport, notifier).await
}
