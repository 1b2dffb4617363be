//! Status page and flame graph endpoints

use super::api::StatusReport;
use super::{respond, AppState, IMAGE_SVG, TEXT_HTML, TEXT_PLAIN};
use crate::aggregate::{Relevance, NO_SAMPLES};
use crate::error::ServeError;
use crate::{audit, metrics};
use hyper::{Body, Response, StatusCode};
use std::fmt::Write;
use tracing::warn;

/// What `/flamegraph*` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    /// Rendered SVG
    Svg,
    /// Collapsed-stack text
    Collapsed,
}

impl GraphFormat {
    pub fn path(&self) -> &'static str {
        match self {
            GraphFormat::Svg => "/flamegraph",
            GraphFormat::Collapsed => "/flamegraph/raw",
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            GraphFormat::Svg => "svg",
            GraphFormat::Collapsed => "raw",
        }
    }
}

pub async fn flamegraph(state: &AppState, format: GraphFormat) -> Response<Body> {
    match build_graph(state, format).await {
        Ok(res) => {
            metrics::RENDER_TOTAL
                .with_label_values(&[format.kind(), "ok"])
                .inc();
            res
        }
        Err(e) => {
            warn!("Serving {} failed: {}", format.path(), e);
            metrics::RENDER_TOTAL
                .with_label_values(&[format.kind(), "error"])
                .inc();
            respond(StatusCode::INTERNAL_SERVER_ERROR, TEXT_PLAIN, e.to_string())
        }
    }
}

async fn build_graph(state: &AppState, format: GraphFormat) -> Result<Response<Body>, ServeError> {
    let stacks = state.session.read_stacks().await?;
    metrics::STACKS_READ.inc_by(stacks.len() as f64);

    let relevance = Relevance::of(&stacks);
    audit::stacks_served(format.path(), relevance.relevant, relevance.total);

    if format == GraphFormat::Svg && relevance.relevant == 0 {
        return Ok(respond(StatusCode::OK, TEXT_PLAIN, NO_SAMPLES));
    }

    let collapser = state.collapser.clone();
    let collapsed = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ServeError> {
        let _timer = metrics::COLLAPSE_DURATION.start_timer();
        let mut out = Vec::new();
        collapser.collapse(&mut out, &stacks)?;
        Ok(out)
    })
    .await??;

    match format {
        GraphFormat::Collapsed => Ok(respond(StatusCode::OK, TEXT_PLAIN, collapsed)),
        GraphFormat::Svg => {
            let body = state.renderer.render(collapsed, relevance.to_string()).await?;
            Ok(respond(StatusCode::OK, IMAGE_SVG, body))
        }
    }
}

pub async fn index(state: &AppState) -> Response<Body> {
    respond(StatusCode::OK, TEXT_HTML, render_index(&StatusReport::collect(state).await))
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn render_index(report: &StatusReport) -> String {
    let mut html = String::new();
    let counters = match &report.counters {
        Some(c) => format!("{} relevant of {} events", c.relevant, c.total),
        None => "unavailable".to_string(),
    };

    // writing to a String cannot fail
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>gueststack on {host}</title></head>
<body>
<h1>gueststack on {host}</h1>
<p>Sampling: <b id="status">{status}</b></p>
<p>Events: {counters}</p>
<p>Stack buffers: {buffers}</p>
<p>Relevant ranges:</p>
<ul>
"#,
        host = escape(&report.hostname),
        status = report.status,
        counters = counters,
        buffers = report.stack_buffers,
    );
    for range in &report.relevant_ranges {
        let _ = writeln!(html, "<li><code>{}</code></li>", escape(range));
    }
    html.push_str(
        r#"</ul>
<p>
<button onclick="control('start')">Start</button>
<button onclick="control('stop')">Stop</button>
<button onclick="control('reset')">Reset</button>
<span id="result"></span>
</p>
<p><a href="/flamegraph">Flame graph</a> | <a href="/flamegraph/raw">Collapsed stacks</a></p>
<script>
function control(op) {
  fetch('/api/' + op, {method: 'POST'})
    .then(function (res) { return res.text(); })
    .then(function (text) {
      document.getElementById('result').textContent = text;
      if (text === 'ok') { location.reload(); }
    });
}
</script>
</body>
</html>
"#,
    );
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use gueststack_agent::{EventCounters, SessionStatus};

    fn report() -> StatusReport {
        StatusReport {
            hostname: "guest<1>".to_string(),
            status: SessionStatus::Sampling,
            counters: Some(EventCounters { total: 40, relevant: 3 }),
            relevant_ranges: vec!["1000-2000".to_string()],
            stack_buffers: 2,
        }
    }

    #[test]
    fn test_index_shows_session_state() {
        let html = render_index(&report());

        assert!(html.contains("gueststack on guest&lt;1&gt;"));
        assert!(html.contains(r#"<b id="status">sampling</b>"#));
        assert!(html.contains("3 relevant of 40 events"));
        assert!(html.contains("<code>1000-2000</code>"));
        assert!(html.contains("fetch('/api/' + op"));
    }

    #[test]
    fn test_index_without_counters() {
        let report = StatusReport {
            counters: None,
            ..report()
        };
        assert!(render_index(&report).contains("Events: unavailable"));
    }
}
