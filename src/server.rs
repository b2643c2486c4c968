//! HTTP exposition of the registry
//!
//! Every request to the metrics path gathers the registry from scratch on a
//! blocking worker, since partition collection waits on child processes.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;

use crate::error::{ExporterError, Result};

/// Serves a registry on a single path
pub struct MetricsServer {
    registry: Registry,
    metrics_path: String,
}

impl MetricsServer {
    /// Create a server for `registry`
    pub fn new(registry: Registry, metrics_path: impl Into<String>) -> Self {
        Self {
            registry,
            metrics_path: metrics_path.into(),
        }
    }

    /// Bind `addr` and serve until `shutdown` resolves
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ExporterError::Server(format!("Failed to bind {}: {}", addr, e)))?;
        info!("Serving metrics on http://{}{}", addr, self.metrics_path);

        self.serve_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve_listener<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let server = Arc::new(self);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down metrics server");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            debug!("Accepted connection from {}", peer);
                            let server = Arc::clone(&server);
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req: Request<Incoming>| {
                                    let server = Arc::clone(&server);
                                    async move { Ok::<_, hyper::Error>(server.handle(req).await) }
                                });
                                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                                    warn!("Metrics connection error: {}", err);
                                }
                            });
                        }
                        Err(err) => {
                            error!("Metrics accept error: {}", err);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        if req.uri().path() != self.metrics_path {
            return text_response(StatusCode::NOT_FOUND, "not found\n");
        }
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
        }

        let registry = self.registry.clone();
        let gathered = tokio::task::spawn_blocking(move || registry.gather()).await;

        let families = match gathered {
            Ok(families) => families,
            Err(e) => {
                error!("Metrics gather task failed: {}", e);
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, "gather failed\n");
            }
        };

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "encode failed\n");
        }

        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", encoder.format_type())
            .body(Full::new(Bytes::from(buffer)))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"bad response"))))
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"bad response"))))
}
