use anyhow::Context;
use axum::Router;
use storefront::config::AppConfig;
use storefront::http;
use storefront::lifecycle::{setup_tracing, ServiceSystem};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal outside development.
    let dotenv = dotenvy::dotenv();
    let config = AppConfig::load().context("loading configuration")?;
    setup_tracing(&config.log);
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let system = ServiceSystem::new(&config)
        .await
        .context("starting services")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let services = [
        ("orders", config.services.orders_port, system.orders_router()),
        ("products", config.services.products_port, system.products_router()),
        ("users", config.services.users_port, system.users_router()),
    ];

    let mut servers = Vec::with_capacity(services.len());
    for (name, port, router) in services {
        servers.push(start_server(name, &config.host, port, router, stop_rx.clone()).await?);
    }

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    info!("Ctrl-C received, draining connections");
    stop_tx.send_replace(true);

    for server in servers {
        if let Err(e) = server.await {
            error!("Server task failed: {:?}", e);
        }
    }

    system
        .shutdown()
        .await
        .map_err(anyhow::Error::msg)
        .context("shutting down")
}

async fn start_server(
    name: &'static str,
    host: &str,
    port: u16,
    router: Router,
    mut stop: watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {name} service to {addr}"))?;
    info!(service = name, %addr, "Listening");

    let shutdown = async move {
        let _ = stop.wait_for(|stopped| *stopped).await;
    };
    Ok(tokio::spawn(async move {
        if let Err(e) = http::serve(router, listener, shutdown).await {
            error!(service = name, error = %e, "Server failed");
        }
    }))
}
