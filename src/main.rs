use weather_bi_connector::config::Config;
use weather_bi_connector::observability::init_tracing;
use weather_bi_connector::server::ConnectorServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let config = Config::from_env()?;
    tracing::info!(
        backend = ?config.cache.backend,
        port = config.server.port,
        "Starting weather BI connector"
    );

    let server = ConnectorServer::new(config).await?;
    server.run().await?;

    Ok(())
}
