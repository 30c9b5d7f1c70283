use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::Duration,
};
use tracing::{info, warn};

use crate::{
    hub::{Hub, HubHandle},
    session,
};

pub struct Server {
    listener: TcpListener,
    idle_timeout: Duration,
}

impl Server {
    pub fn new(listener: TcpListener, idle_timeout: Duration) -> Self {
        Self {
            listener,
            idle_timeout,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the shutdown future completes. The hub task
    /// outlives this loop only as long as live sessions keep handles to it.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            idle_timeout,
        } = self;

        let (hub, handle) = Hub::new();
        tokio::spawn(hub.run());
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    handle_accept_result(accepted, &handle, idle_timeout);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    hub: &HubHandle,
    idle_timeout: Duration,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, hub, idle_timeout),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, hub: &HubHandle, idle_timeout: Duration) {
    let hub = hub.clone();
    tokio::spawn(async move {
        if let Err(err) = session::run(stream, hub, idle_timeout).await {
            warn!(peer = %peer, error = ?err, "session ended with error");
        }
    });
}
