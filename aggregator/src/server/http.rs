//! HTTP server and request routing

use super::{api, pages, respond, AppState, TEXT_PLAIN};
use crate::metrics;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Serve until `shutdown` resolves, then finish in-flight requests.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_| {
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                let state = state.clone();
                async move { handle(req, &state).await }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    tracing::info!("HTTP server listening on {}", server.local_addr());
    server.with_graceful_shutdown(shutdown).await
}

/// Route one request. Handler failures become error responses, never `Err`.
pub async fn handle(req: Request<Body>, state: &AppState) -> Result<Response<Body>, hyper::Error> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();
    drop(req);

    let response = match path.as_str() {
        "/" => pages::index(state).await,
        "/flamegraph" => pages::flamegraph(state, pages::GraphFormat::Svg).await,
        "/flamegraph/raw" => pages::flamegraph(state, pages::GraphFormat::Collapsed).await,
        "/healthz" => respond(StatusCode::OK, TEXT_PLAIN, "ok\n"),
        "/metrics" => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            metrics::encode_metrics(),
        ),
        p if p.starts_with("/api/") => api::handle_api(&method, p, state).await,
        _ => respond(StatusCode::NOT_FOUND, TEXT_PLAIN, "not found\n"),
    };

    tracing::debug!("{} {} -> {}", method, path, response.status());
    Ok(response)
}
