use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::Mutex;
use tracing::error;
use tracing::info;
use welcome_notifier::config::NotifierConfig;
use welcome_notifier::logging;
use welcome_notifier::signals;
use welcome_notifier::NotifierOpt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = NotifierOpt::parse();
    logging::log_init(&opt.log_args);

    let config = NotifierConfig::load(opt.config_path.as_deref())
        .context("Failed to load the configuration")?;
    info!(batching = ?config.batching, "Starting welcome notifier");

    let input = BufReader::new(tokio::io::stdin());
    let output = Arc::new(Mutex::new(tokio::io::stdout()));
    let interrupt = async {
        if let Err(err) = signals::interrupt().await {
            error!("Failed to listen to termination signals: {err}");
            std::future::pending::<()>().await;
        }
    };

    welcome_notifier::run(config, input, output, interrupt).await
}
