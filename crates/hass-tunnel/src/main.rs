use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use realm_auth::{MandateVerifier, RealmClient};
use tunnel_client::TunnelClient;

use hass_tunnel::config::{Config, LogFormat};
use hass_tunnel::handler::OriginHandler;
use hass_tunnel::identity;
use hass_tunnel::origin::LocalOriginClient;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Seed the environment from ./.env; real environment wins.
    let _ = dotenvy::dotenv();

    // 2. Load configuration.
    let cfg = Config::from_env()?;

    // 3. Init tracing with the configured level and formatter.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level));

    match cfg.log_formatter {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        local = %cfg.local,
        proxy = %cfg.proxy_endpoint,
        "starting hass-tunnel"
    );

    // 4. Load or create the identity keypair.
    let key = identity::load_or_create(&cfg.key_path)?;

    // 5. Open the tunnel and register our identity with the rendezvous
    //    proxy. The transport keeps reconnecting on its own from here on.
    let client = TunnelClient::connect(&cfg.proxy_endpoint);
    let hostname = client
        .register(&key)
        .await
        .context("failed to register with rendezvous proxy")?;

    info!(%hostname, "got hostname");

    // 6. Register with the realm controller; it answers with the realm key
    //    and roles to trust for the rest of the process lifetime.
    let controller = RealmClient::new(&cfg.remote, env!("CARGO_PKG_VERSION"));
    let binding = controller
        .register(&format!("https://{hostname}"), &cfg.binding, &cfg.secret)
        .await
        .context("failed to register with realm controller")?;

    // 7. Wire the origin handler and start serving tunneled traffic.
    let verifier = MandateVerifier::new(&binding);
    let origin = LocalOriginClient::new(&cfg.local, &cfg.local_host, &cfg.hassio_token)
        .context("failed to build local origin client")?;
    client.set_handler(Arc::new(OriginHandler::new(verifier, origin)));

    // 8. On SIGINT/SIGTERM, send a best-effort disconnect and stop.
    let signal_client = client.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => info!("received SIGINT (ctrl-c)"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT (ctrl-c)");
        }

        signal_client.disconnect().await;
    });

    // 9. Block on the transport's lifetime.
    client.wait().await;

    info!("hass-tunnel stopped");
    Ok(())
}
