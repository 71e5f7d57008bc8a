use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::handler::{handle_request, ServerState};

/// Serve one client connection until it closes or `timeout` passes.
///
/// When `shutdown` fires, in-flight requests finish and the connection is
/// closed instead of kept alive.
pub async fn serve_connection(
    builder: ConnBuilder<TokioExecutor>,
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
    timeout: tokio::time::Duration,
    shutdown: CancellationToken,
) {
    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { Ok::<_, hyper::Error>(handle_request(req, peer, &state).await) }
    });

    let conn = builder.serve_connection(TokioIo::new(stream), svc);
    tokio::pin!(conn);

    let serve = async {
        let mut draining = false;
        loop {
            tokio::select! {
                res = conn.as_mut() => break res,
                _ = shutdown.cancelled(), if !draining => {
                    draining = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    };

    match tokio::time::timeout(timeout, serve).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(?peer, error = %e, "serve_connection error");
        }
        Err(_) => {
            warn!(?peer, "connection handling timeout");
        }
    }
}
