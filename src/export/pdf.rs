//! HTML → PDF through a headless browser.
//!
//! Each render gets its own scratch directory holding the page and the
//! printed output. The browser process is owned by a [`BrowserProcess`]
//! guard: it is killed and reaped on every exit path, including timeouts
//! and cancellation. Cleanup failures are logged and never replace the
//! render result.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::ExportConfig;
use crate::error::ConvertError;

const FORMAT: &str = "pdf";
const MAX_STDERR_CHARS: usize = 500;

/// Turns a complete HTML page into PDF bytes.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(&self, html: &str) -> Result<Vec<u8>, ConvertError>;
}

/// Prints pages with `chromium --headless --print-to-pdf`.
#[derive(Debug, Clone)]
pub struct ChromiumRenderer {
    browser_path: PathBuf,
    timeout: Duration,
}

impl ChromiumRenderer {
    pub fn new(config: &ExportConfig) -> Self {
        Self {
            browser_path: config.browser_path.clone(),
            timeout: Duration::from_secs(config.render_timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, page: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.browser_path);
        cmd.arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--no-pdf-header-footer")
            .arg(format!("--print-to-pdf={}", output.display()))
            .arg(format!("file://{}", page.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl PdfRenderer for ChromiumRenderer {
    async fn render(&self, html: &str) -> Result<Vec<u8>, ConvertError> {
        let scratch = tempfile::Builder::new().prefix("mds-pdf-").tempdir()?;
        let page = scratch.path().join("page.html");
        let output = scratch.path().join("page.pdf");
        tokio::fs::write(&page, html).await?;

        let child = self.command(&page, &output).spawn().map_err(|e| {
            ConvertError::conversion(
                FORMAT,
                format!("failed to launch {}: {}", self.browser_path.display(), e),
            )
        })?;
        let mut browser = BrowserProcess::new(child);

        let result = match tokio::time::timeout(self.timeout, browser.wait()).await {
            Ok(Ok((status, _))) if status.success() => read_output(&output).await,
            Ok(Ok((status, stderr))) => Err(ConvertError::conversion(
                FORMAT,
                format!("browser exited with {}: {}", status, truncate(&stderr)),
            )),
            Ok(Err(e)) => Err(ConvertError::conversion(FORMAT, e)),
            Err(_) => Err(ConvertError::conversion(
                FORMAT,
                format!("browser did not finish within {:?}", self.timeout),
            )),
        };

        browser.shutdown().await;
        let dir = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(dir = %dir.display(), error = %e, "Failed to remove PDF scratch directory");
        }

        result
    }
}

async fn read_output(output: &Path) -> Result<Vec<u8>, ConvertError> {
    match tokio::fs::read(output).await {
        Ok(bytes) if bytes.starts_with(b"%PDF") => Ok(bytes),
        Ok(_) => Err(ConvertError::conversion(FORMAT, "browser produced no PDF output")),
        Err(e) => Err(ConvertError::conversion(
            FORMAT,
            format!("browser produced no PDF output: {}", e),
        )),
    }
}

fn truncate(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.chars().count() <= MAX_STDERR_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_STDERR_CHARS).collect();
    out.push_str("...");
    out
}

/// Owns the browser child process until it has been reaped.
struct BrowserProcess {
    child: Option<Child>,
}

impl BrowserProcess {
    fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    async fn wait(&mut self) -> std::io::Result<(ExitStatus, String)> {
        let child = match self.child.as_mut() {
            Some(child) => child,
            None => return Err(std::io::Error::other("browser process already reaped")),
        };
        let mut stderr = String::new();
        let status = match child.stderr.take() {
            Some(mut pipe) => {
                let (status, _) = tokio::join!(child.wait(), pipe.read_to_string(&mut stderr));
                status?
            }
            None => child.wait().await?,
        };
        Ok((status, stderr))
    }

    /// Kills the process if it is still running and waits for it to exit.
    async fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => debug!(%status, "Browser exited"),
            Ok(None) | Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill browser process");
                }
            }
        }
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to kill browser process");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Captures the HTML it is given and returns a fixed PDF.
    #[derive(Default)]
    pub(crate) struct RecordingRenderer {
        pub pages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PdfRenderer for RecordingRenderer {
        async fn render(&self, html: &str) -> Result<Vec<u8>, ConvertError> {
            self.pages.lock().unwrap().push(html.to_string());
            Ok(b"%PDF-1.4 test".to_vec())
        }
    }

    fn renderer(path: &Path) -> ChromiumRenderer {
        ChromiumRenderer::new(&ExportConfig {
            browser_path: path.to_path_buf(),
            render_timeout_secs: 10,
        })
    }

    #[tokio::test]
    async fn missing_browser_is_conversion_error() {
        let err = renderer(Path::new("/nonexistent/chromium"))
            .render("<html></html>")
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Conversion { format: "pdf", ref message } if message.contains("failed to launch")));
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-browser");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prints_through_browser_arguments() {
        let tmp = tempfile::TempDir::new().unwrap();
        let browser = script(
            tmp.path(),
            r#"for arg in "$@"; do
  case "$arg" in
    --print-to-pdf=*) printf '%%PDF-1.4 fake' > "${arg#--print-to-pdf=}" ;;
  esac
done"#,
        );
        let pdf = renderer(&browser).render("<p>hi</p>").await.unwrap();
        assert_eq!(pdf, b"%PDF-1.4 fake");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_browser_reports_stderr() {
        let tmp = tempfile::TempDir::new().unwrap();
        let browser = script(tmp.path(), "echo 'no display' >&2\nexit 3");
        let err = renderer(&browser).render("<p>hi</p>").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("no display"), "{}", message);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_browser_is_killed_on_timeout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let browser = script(tmp.path(), "exec sleep 30");
        let started = std::time::Instant::now();
        let err = renderer(&browser)
            .with_timeout(Duration::from_millis(200))
            .render("<p>hi</p>")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not finish"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn stderr_is_truncated() {
        let long = "x".repeat(MAX_STDERR_CHARS + 10);
        assert_eq!(truncate(&long).len(), MAX_STDERR_CHARS + 3);
        assert_eq!(truncate("  short \n"), "short");
    }
}
