#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use futures::{Stream, StreamExt};
use server::{
    auth::remote::BridgeAuthenticator,
    bridge::Hub,
    config::{CliArgs, ServerConfig},
    dispatch::{ModuleRegistry, background_modules},
    relay::connection::handle_connection,
    service::BackgroundService,
    signing::AuthOrchestrator,
    telemetry::{TelemetryProviders, init_telemetry},
    wallet::WalletState,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            let incoming = UnixListenerStream::new(uds);
            log_startup_info(&uds_path, &config);
            let res = run_server_with_incoming(providers, incoming, config).await;
            // Best effort: a panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        let incoming = TcpListenerStream::new(tcp);
        log_startup_info(&tcp_path, &config);
        run_server_with_incoming(providers, incoming, config).await
    }
}

async fn run_server_with_incoming<I, IO, IE>(
    providers: TelemetryProviders,
    incoming: I,
    config: ServerConfig,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    IE: std::fmt::Display,
{
    let wallet = Arc::new(match &config.wallet_file {
        Some(path) => WalletState::load(path)?,
        None => WalletState::default(),
    });

    let hub = Hub::new(config.max_message_bytes, config.endpoint_buffer_size);
    let authenticator = BridgeAuthenticator::new(
        hub.clone(),
        config.auth_destination.clone(),
        config.auth_timeout,
    );
    let orchestrator = Arc::new(AuthOrchestrator::new(
        hub.clone(),
        authenticator,
        config.chunk_bytes,
        config.sign_timeout,
    ));
    let registry = Arc::new(ModuleRegistry::new(background_modules(
        Arc::clone(&wallet),
        orchestrator,
    ))?);
    let service = BackgroundService::new(hub.clone(), registry, wallet);
    let api_listener = service.start();

    let disconnect = CancellationToken::new();
    let connections = TaskTracker::new();
    let signal = shutdown_signal();
    tokio::pin!(incoming, signal);

    loop {
        tokio::select! {
            () = &mut signal => break,
            conn = incoming.next() => match conn {
                Some(Ok(io)) => {
                    connections.spawn(serve_connection(io, hub.clone(), disconnect.child_token()));
                }
                Some(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Failed to accept connection: {}", _e);
                }
                None => break,
            },
        }
    }

    // 1. Refuse new API calls and let in-flight signing settle
    let _remaining = service.shutdown(config.shutdown_timeout).await;
    drop(api_listener);

    // 2. Disconnect every context
    disconnect.cancel();
    connections.close();
    if tokio::time::timeout(config.shutdown_timeout, connections.wait())
        .await
        .is_err()
    {
        #[cfg(feature = "tracing")]
        tracing::warn!("Connections still open after shutdown timeout");
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Service shut down successfully");

    // 3. Flush telemetry
    providers.shutdown();
    Ok(())
}

async fn serve_connection<IO>(io: IO, hub: Hub, disconnect: CancellationToken)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let fut = async move {
        if let Err(_e) = handle_connection(io, hub, disconnect).await {
            #[cfg(feature = "tracing")]
            tracing::debug!("Connection closed with error: {}", _e);
        }
    };
    #[cfg(feature = "tracing")]
    let fut = {
        use tracing::Instrument;
        fut.instrument(tracing::info_span!("connection"))
    };
    fut.await;
}

fn log_startup_info(_addr: &str, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting signing bridge on {} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting signing bridge on {} (chunk size {} bytes, sign timeout {:?})",
            _addr,
            _config.chunk_bytes,
            _config.sign_timeout
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {}", _e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {}", _e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");
}
