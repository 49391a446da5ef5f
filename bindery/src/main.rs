use bindery::{cli::run_cli, config::init_config};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, reload, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env();
    let from_env = env_filter.is_ok();
    let (env_filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|_| EnvFilter::new("info")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = init_config()?;
    if !from_env {
        filter_handle.reload(EnvFilter::try_new(&config.log.filter)?)?;
    }

    run_cli(config).await?;
    Ok(())
}
