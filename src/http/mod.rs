//! Thin JSON facade over [`Manager`](crate::manager::Manager).
//!
//! HTTP/1.1 only; every accepted connection is served on its own task.

mod response;
mod routes;

use std::{convert::Infallible, future::Future, net::SocketAddr, sync::Arc};

use hyper::{Request, body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use crate::{manager::Manager, process::ProcessHost, rules::RuleAccessor};

/// Accept connections on `addr` until `shutdown` resolves.
pub async fn serve<R, H>(
    manager: Arc<Manager<R, H>>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()>
where
    R: RuleAccessor,
    H: ProcessHost,
{
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "web UI listening");

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "accepted connection");
                    spawn_connection(manager.clone(), stream);
                }
                Err(error) => tracing::warn!(%error, "failed to accept connection"),
            },
            () = &mut shutdown => {
                tracing::info!("web UI shutting down");
                return Ok(());
            }
        }
    }
}

fn spawn_connection<R, H>(manager: Arc<Manager<R, H>>, stream: TcpStream)
where
    R: RuleAccessor,
    H: ProcessHost,
{
    tokio::spawn(async move {
        let service = service_fn(move |request: Request<Incoming>| {
            let manager = manager.clone();
            async move { Ok::<_, Infallible>(routes::handle(&manager, request).await) }
        });
        if let Err(error) = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await
        {
            if error.is_incomplete_message() {
                tracing::debug!(%error, "connection closed early");
            } else {
                tracing::warn!(%error, "connection error");
            }
        }
    });
}
