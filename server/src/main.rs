use tokio::net::TcpListener;
use watchparty_server::{Config, RoomBroker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "watchparty_server=debug,info".into()),
        )
        .init();

    let config = Config::from_env();
    let addr = config.bind_addr()?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Watchparty relay listening on {}", addr);
    watchparty_server::serve(listener, RoomBroker::new()).await
}
