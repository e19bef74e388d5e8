//! HTTP Interface
//!
//! A single endpoint, `POST /`, whose body is one text command:
//!
//! ```text
//! $ curl -d 'SETLIST fruits apple pear' http://127.0.0.1:4500/
//! {}
//! $ curl -d 'GETLIST fruits' http://127.0.0.1:4500/
//! {"data":["apple","pear"]}
//! $ curl -i -d 'GET nobody' http://127.0.0.1:4500/
//! HTTP/1.1 404 Not Found
//! ```
//!
//! | Outcome    | Status | Body                  |
//! |------------|--------|-----------------------|
//! | value      | 200    | `{"data": ...}`       |
//! | write      | 200    | `{}`                  |
//! | not found  | 404    | empty                 |
//! | any error  | 500    | `{"error": "..."}`    |
//!
//! Plain serving goes through `axum::serve`. With mutual TLS each accepted
//! stream is handshaken with `tokio-rustls` and then driven by `hyper`
//! directly.

use crate::commands::{CommandHandler, Reply};
use crate::config::ConnectionLimits;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// JSON body of every non-404 response. Absent fields are omitted.
#[derive(Debug, Default, Serialize)]
pub struct CommandResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Reply::is_none")]
    pub data: Reply,
}

/// Builds the router serving `POST /`.
pub fn router(handler: CommandHandler, limits: &ConnectionLimits) -> Router {
    Router::new()
        .route("/", post(command_handler))
        .layer(DefaultBodyLimit::max(limits.max_request))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

async fn command_handler(State(handler): State<CommandHandler>, body: Bytes) -> Response {
    match handler.handle(&body) {
        Ok(data) => Json(CommandResponse { error: None, data }).into_response(),
        Err(e) if e.is_not_found() => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            debug!(error = %e, "Command failed");
            let body = CommandResponse {
                error: Some(e.to_string()),
                data: Reply::None,
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

/// Serves plain HTTP until the listener fails.
pub async fn serve_http(
    listener: TcpListener,
    handler: CommandHandler,
    limits: ConnectionLimits,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTP listener ready");
    }
    axum::serve(listener, router(handler, &limits)).await
}

/// Serves HTTPS with client certificate verification, forever.
pub async fn serve_https(
    listener: TcpListener,
    handler: CommandHandler,
    acceptor: TlsAcceptor,
    limits: ConnectionLimits,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTPS listener ready");
    }
    let app = router(handler, &limits);

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let app = app.clone();

        tokio::spawn(async move {
            let stream =
                match tokio::time::timeout(limits.idle_timeout, acceptor.accept(stream)).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        warn!(client = %addr, error = %e, "TLS handshake failed");
                        return;
                    }
                    Err(_) => {
                        warn!(client = %addr, "TLS handshake timed out");
                        return;
                    }
                };

            let service = service_fn(move |request: axum::http::Request<Incoming>| {
                app.clone().oneshot(request)
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(client = %addr, error = %e, "HTTPS connection closed with error");
            }
        });
    }
}
