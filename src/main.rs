//! Sympozium controller entry point.

use anyhow::{Context, Result};
use clap::Parser;
use sympozium::infrastructure::controller::ControllerContext;
use sympozium::infrastructure::logging::LoggerImpl;
use sympozium::services::Config;

/// Cluster-resident control plane turning declarative agent identities
/// into ephemeral sandboxed worker pods.
#[derive(Debug, Parser)]
#[command(name = "sympozium-controller", version, about)]
struct Args {
    /// Optional TOML config file layered under defaults and environment
    /// variables (`SYMPOZIUM_` prefix); if omitted, only defaults and
    /// the environment are used.
    #[arg(long, env = "SYMPOZIUM_CONFIG_FILE")]
    config_file: Option<std::path::PathBuf>,

    /// Address the admission webhook's HTTPS-terminated-upstream HTTP
    /// server binds, typically fronted by the Service/Ingress the
    /// ValidatingWebhookConfiguration and MutatingWebhookConfiguration
    /// point at.
    #[arg(long, env = "SYMPOZIUM_WEBHOOK_ADDR", default_value = "0.0.0.0:8443")]
    webhook_addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config_file {
        Some(path) => Config::load(path).context("failed to load configuration file")?,
        None => Config::load_from_env().context("failed to load configuration from environment")?,
    };

    let _logger = LoggerImpl::init(&config.logging).context("failed to initialize logging")?;

    let ctx = ControllerContext::build(config)
        .await
        .context("failed to build controller context")?;

    sympozium::infrastructure::controller::run(ctx, args.webhook_addr).await
}
