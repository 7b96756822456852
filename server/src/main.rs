use {
    anyhow::Result,
    clap::Parser,
    kontecst_proxy::{Config, util::init_tracing},
    std::path::PathBuf,
};

/// Encrypted file proxy for Kontecst packages.
///
/// Every setting can also be given as an environment variable, which overrides the file.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    /// Path to a json5 config file.
    #[clap(long)]
    pub config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    init_tracing(&config.log_filter)?;
    tracing::debug!(?config, "loaded config");
    kontecst_proxy::run(&config).await
}
