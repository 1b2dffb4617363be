//! HTTP surface: status page, flame graphs, session control and metrics

pub mod api;
pub mod http;
pub mod pages;

use crate::aggregate::Collapser;
use crate::flamegraph::Renderer;
use gueststack_agent::SamplingSession;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Response, StatusCode};
use std::sync::Arc;
use tracing::warn;

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const TEXT_HTML: &str = "text/html; charset=utf-8";
pub const IMAGE_SVG: &str = "image/svg+xml";
pub const APPLICATION_JSON: &str = "application/json";

/// Everything a request handler needs
#[derive(Debug)]
pub struct AppState {
    pub session: Arc<SamplingSession>,
    pub collapser: Arc<Collapser>,
    pub renderer: Renderer,
    pub hostname: String,
}

impl AppState {
    pub fn new(session: Arc<SamplingSession>, collapser: Arc<Collapser>, renderer: Renderer) -> Self {
        let hostname = match hostname::get() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(e) => {
                warn!("Cannot read hostname: {}", e);
                "localhost".to_string()
            }
        };

        Self {
            session,
            collapser,
            renderer,
            hostname,
        }
    }
}

/// Build a response without going through the fallible builder
pub(crate) fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response<Body> {
    let mut res = Response::new(body.into());
    *res.status_mut() = status;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    res
}
