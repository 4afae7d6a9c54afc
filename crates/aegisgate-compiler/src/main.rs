//! AegisGate CLI
//!
//! 以 dry-run 方式编译 ZeroTrustPolicy 并输出应用集合。

use aegisgate_compiler::Cli;
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let batch = cli.execute(&config).await?;
    let output = serde_json::to_string_pretty(&batch).context("序列化应用集合失败")?;
    println!("{}", output);
    Ok(())
}
