//! Flame graph rendering
//!
//! Collapsed stacks are turned into an SVG either in-process with inferno or
//! by piping them through an external `flamegraph.pl`-compatible script.

use crate::error::ServeError;
use hyper::Body;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// How collapsed stacks become an SVG
#[derive(Debug, Clone, Default)]
pub enum Renderer {
    /// Run `<path> --title <title>`, collapsed text on stdin, SVG on stdout
    External(PathBuf),

    /// inferno, in a blocking task
    #[default]
    Inferno,
}

impl Renderer {
    pub fn from_script(script: Option<PathBuf>) -> Self {
        script.map(Renderer::External).unwrap_or_default()
    }

    pub fn name(&self) -> String {
        match self {
            Renderer::External(path) => path.display().to_string(),
            Renderer::Inferno => "inferno".to_string(),
        }
    }

    /// Render `collapsed` into a response body titled `title`.
    ///
    /// The external script's output is streamed as it is produced; there is
    /// no timeout on it.
    pub async fn render(&self, collapsed: Vec<u8>, title: String) -> Result<Body, ServeError> {
        match self {
            Renderer::External(script) => render_external(script, collapsed, &title),
            Renderer::Inferno => {
                let svg = tokio::task::spawn_blocking(move || render_inferno(&collapsed, &title)).await??;
                Ok(Body::from(svg))
            }
        }
    }
}

fn render_inferno(collapsed: &[u8], title: &str) -> Result<Vec<u8>, ServeError> {
    let text = String::from_utf8_lossy(collapsed);
    let mut opts = inferno::flamegraph::Options::default();
    opts.title = title.to_string();
    opts.count_name = "samples".to_string();

    let mut svg = Vec::new();
    inferno::flamegraph::from_lines(&mut opts, text.lines(), &mut svg).map_err(|e| ServeError::Render(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    Ok(svg)
}

fn render_external(script: &Path, collapsed: Vec<u8>, title: &str) -> Result<Body, ServeError> {
    let tool = script.display().to_string();
    let mut child = Command::new(script)
        .arg("--title")
        .arg(title)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ServeError::Launch {
            tool: tool.clone(),
            source,
        })?;

    let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(ServeError::Launch {
            tool,
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "renderer pipes not captured"),
        });
    };

    // fed concurrently with reading stdout
    tokio::spawn(async move {
        if let Err(e) = stdin.write_all(&collapsed).await {
            debug!("Writing collapsed stacks to renderer failed: {}", e);
        }
    });

    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => debug!("{} finished", tool),
            Ok(status) => warn!("{} exited with {}", tool, status),
            Err(e) => warn!("Waiting for {} failed: {}", tool, e),
        }
    });

    Ok(Body::wrap_stream(ReaderStream::new(stdout)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const COLLAPSED: &[u8] = b"foo:kallsyms;bar:kallsyms; 1\nfoo:kallsyms; 1\n";

    #[tokio::test]
    async fn test_inferno_renders_svg_with_title() {
        let body = Renderer::Inferno
            .render(COLLAPSED.to_vec(), "50.00% relevant (1/2)".to_string())
            .await
            .unwrap();
        let svg = String::from_utf8(hyper::body::to_bytes(body).await.unwrap().to_vec()).unwrap();

        assert!(svg.contains("<svg"));
        assert!(svg.contains("50.00% relevant (1/2)"));
        assert!(svg.contains("bar:kallsyms"));
    }

    #[tokio::test]
    async fn test_external_script_streams_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("flamegraph.pl");
        std::fs::write(&script, "#!/bin/sh\necho \"title=$2\"\ncat\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let renderer = Renderer::from_script(Some(script));
        let body = renderer
            .render(COLLAPSED.to_vec(), "25.00% relevant (1/4)".to_string())
            .await
            .unwrap();
        let out = hyper::body::to_bytes(body).await.unwrap();

        let mut expected = b"title=25.00% relevant (1/4)\n".to_vec();
        expected.extend_from_slice(COLLAPSED);
        assert_eq!(out.as_ref(), expected.as_slice());
    }

    #[tokio::test]
    async fn test_missing_script_is_launch_error() {
        let renderer = Renderer::External(PathBuf::from("/nonexistent/flamegraph.pl"));
        let err = renderer.render(Vec::new(), String::new()).await.unwrap_err();
        assert!(matches!(err, ServeError::Launch { .. }));
    }

    #[test]
    fn test_default_is_inferno() {
        assert!(matches!(Renderer::from_script(None), Renderer::Inferno));
        assert_eq!(Renderer::default().name(), "inferno");
    }
}
