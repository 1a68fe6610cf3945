//! Harness shared by the integration tests: a real server on an ephemeral
//! port, running on the test runtime until stopped.

use std::net::SocketAddr;

use splat_server::server::bind_ephemeral;
use tokio::{sync::oneshot, task::JoinHandle};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    /// Starts a server with only the floor in the world.
    pub async fn start(tick_hz: u32) -> anyhow::Result<Self> {
        let (mut server, cfg) = bind_ephemeral(tick_hz).await?;
        let addr = cfg.server_addr.parse()?;
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .run_until(async {
                    let _ = rx.await;
                })
                .await
        });
        Ok(Self {
            addr,
            shutdown: Some(tx),
            handle,
        })
    }

    pub async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await?
    }
}
