//! SpaceWeave allocator server
//!
//! Long-lived process exposing Allocate/Free/GetDiskUtilization over a
//! framed TCP protocol. Configuration comes from the environment; state is
//! restored from the configured snapshot file at startup and snapshotted in
//! the background while the server runs.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use spaceweave::persistence::{load_state, BackupRunner};
use spaceweave::service::{decode_request, AllocatorService, REQUEST_LEN};
use spaceweave::Config;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cfg = Config::from_env()?;
    info!(
        addr = %cfg.listen_addr,
        total_size = cfg.total_size,
        unit_size = cfg.unit_size,
        num_shards = cfg.num_shards,
        small_block_limit = cfg.small_block_limit,
        "loaded configuration"
    );

    let allocator = Arc::new(load_state(&cfg)?);
    info!(utilization = allocator.utilization(), "allocator state ready");

    let mut backup = if cfg.state_persistence_path.is_empty() {
        info!("state persistence disabled");
        None
    } else {
        let mut runner = BackupRunner::new(Arc::clone(&allocator), &cfg);
        runner.start();
        info!(path = %cfg.state_persistence_path, "background snapshots enabled");
        Some(runner)
    };

    let service = AllocatorService::new(allocator.clone());
    let idle_limit = Duration::from_secs(cfg.max_idle_sec);

    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!(addr = %cfg.listen_addr, "listening");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((socket, peer)) => {
                        let service = service.clone();
                        connections.spawn(async move {
                            if let Err(err) = serve_connection(service, socket, idle_limit).await {
                                warn!(%peer, %err, "connection closed with error");
                            }
                        });
                    }
                    Err(err) => warn!(%err, "failed to accept connection"),
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
        }
    }

    // Stop accepting, then let every accepted connection run to completion
    // before the final snapshot; the idle limit bounds the wait.
    drop(listener);
    info!(connections = connections.len(), "draining in-flight connections");
    while connections.join_next().await.is_some() {}

    if let Some(runner) = backup.as_mut() {
        runner.stop();
    }
    info!("server stopped");

    Ok(())
}

/// Serve request frames on one connection until the peer disconnects or
/// sits idle past the configured limit.
async fn serve_connection(
    service: AllocatorService,
    mut socket: TcpStream,
    idle_limit: Duration,
) -> spaceweave::Result<()> {
    let mut frame = [0u8; REQUEST_LEN];
    loop {
        match tokio::time::timeout(idle_limit, socket.read_exact(&mut frame)).await {
            Err(_) => {
                debug!("connection idle past limit, closing");
                return Ok(());
            }
            Ok(Err(err)) if err.kind() == ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(err)) => return Err(err.into()),
            Ok(Ok(_)) => {}
        }

        let request = decode_request(&frame)?;
        let response = service.handle(request);
        socket.write_all(&response).await?;
    }
}
