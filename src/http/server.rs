use crate::error::{Error, Result};
use crate::http::Request;
use crate::middleware::Pipeline;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Server as HyperServer};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Default cap on request bodies, in bytes
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Serves a pipeline over HTTP/1
pub struct Server {
    pipeline: Arc<Pipeline>,
    max_body_bytes: usize,
}

impl Server {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Requests with larger bodies get a 413 without reaching the pipeline
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Serve until SIGTERM or SIGINT, then drain in-flight requests
    pub async fn serve(self, addr: &str) -> Result<()> {
        self.serve_until(addr, shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves
    pub async fn serve_until<F>(self, addr: &str, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::config(format!("Invalid listen address '{}': {}", addr, e)))?;

        let pipeline = self.pipeline;
        let max_body_bytes = self.max_body_bytes;
        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let pipeline = Arc::clone(&pipeline);
            let remote = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: hyper::Request<Body>| {
                    let pipeline = Arc::clone(&pipeline);
                    async move {
                        Ok::<_, Infallible>(dispatch(&pipeline, req, remote, max_body_bytes).await)
                    }
                }))
            }
        });

        let server = HyperServer::try_bind(&addr)?.serve(make_svc);
        log::info!("warden listening on {}", addr);

        server.with_graceful_shutdown(shutdown).await?;
        log::info!("Server stopped");
        Ok(())
    }
}

async fn dispatch(
    pipeline: &Pipeline,
    req: hyper::Request<Body>,
    remote: SocketAddr,
    max_body_bytes: usize,
) -> hyper::Response<Body> {
    let response = match Request::from_hyper(req, remote, max_body_bytes).await {
        Ok(request) => pipeline.handle(request).await,
        Err(e) => {
            log::warn!("Rejected unreadable request from {}: {}", remote, e);
            e.to_response()
        }
    };
    response.into_hyper()
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut int) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            log::error!("Could not install shutdown signal handlers: {}", e);
            return futures::future::pending().await;
        }
    };

    let name = tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = int.recv() => "SIGINT",
    };
    log::info!("Received {}, shutting down", name);
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            log::error!("Could not listen for Ctrl+C: {}", e);
            futures::future::pending::<()>().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Response;

    #[tokio::test]
    async fn test_invalid_address_is_config_error() {
        let pipeline = Pipeline::builder()
            .handler_fn(|_req| Ok(Response::text("ok")))
            .build();
        let err = Server::new(Arc::new(pipeline))
            .serve_until("not-an-address", async {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_oversized_body_is_413_without_reaching_pipeline() {
        let pipeline = Pipeline::builder()
            .handler_fn(|_req| Ok(Response::text("ok")))
            .build();
        let remote: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let request = |body: &'static str| {
            hyper::Request::builder()
                .method("POST")
                .uri("/upload")
                .body(Body::from(body))
                .unwrap()
        };

        let refused = dispatch(&pipeline, request("0123456789abcdef"), remote, 8).await;
        assert_eq!(refused.status().as_u16(), 413);

        let accepted = dispatch(&pipeline, request("0123"), remote, 8).await;
        assert_eq!(accepted.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_stops_when_shutdown_resolves() {
        let pipeline = Pipeline::builder()
            .handler_fn(|_req| Ok(Response::text("ok")))
            .build();
        let result = Server::new(Arc::new(pipeline))
            .serve_until("127.0.0.1:0", async {})
            .await;
        assert!(result.is_ok());
    }
}
