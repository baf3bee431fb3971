use std::path::Path;

use futures::future::BoxFuture;
use log::debug;
use tokio::process::Command;

use crate::error::ReportError;

/// Turns a complete HTML document into a PNG image.
pub trait ImageRenderer: Send + Sync {
    fn render<'a>(&'a self, html: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ReportError>>;
}

/// Room for the heading and footer around the table
const PAGE_MARGIN_PX: u32 = 200;
/// Generous height of one table row
const ROW_PX: u32 = 40;

/// Screenshots the page with a headless Chromium/Chrome binary.  `height` is
/// the minimum window height, it grows with the number of table rows so long
/// reports are not cropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ChromeRenderer {
    pub bin: String,
    pub width: u32,
    pub height: u32,
}

impl Default for ChromeRenderer {
    fn default() -> Self {
        ChromeRenderer {
            bin: "chromium".to_string(),
            width: 1280,
            height: 1024,
        }
    }
}

impl ChromeRenderer {
    fn window_height(&self, html: &str) -> u32 {
        let rows = html.matches("<tr").count() as u32;
        self.height
            .max(PAGE_MARGIN_PX.saturating_add(rows.saturating_mul(ROW_PX)))
    }

    fn args(&self, page: &Path, shot: &Path, height: u32) -> Vec<String> {
        vec![
            "--headless".to_string(),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
            "--hide-scrollbars".to_string(),
            format!("--window-size={},{}", self.width, height),
            format!("--screenshot={}", shot.display()),
            format!("file://{}", page.display()),
        ]
    }

    pub async fn screenshot(&self, html: &str) -> Result<Vec<u8>, ReportError> {
        // the directory and both files are removed when `dir` is dropped
        let dir = tempfile::tempdir()
            .map_err(|e| ReportError::Render(format!("can't create temp dir: {}", e)))?;
        let page = dir.path().join("page.html");
        let shot = dir.path().join("shot.png");
        tokio::fs::write(&page, html)
            .await
            .map_err(|e| ReportError::Render(format!("can't write {}: {}", page.display(), e)))?;

        let args = self.args(&page, &shot, self.window_height(html));
        debug!("Running {} {}", self.bin, args.join(" "));
        let output = Command::new(&self.bin)
            .args(&args)
            .output()
            .await
            .map_err(|e| ReportError::Render(format!("can't start {}: {}", self.bin, e)))?;
        if !output.status.success() {
            return Err(ReportError::Render(format!(
                "{} exited with {}: {}",
                self.bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tokio::fs::read(&shot)
            .await
            .map_err(|e| ReportError::Render(format!("no screenshot produced: {}", e)))
    }
}

impl ImageRenderer for ChromeRenderer {
    fn render<'a>(&'a self, html: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ReportError>> {
        Box::pin(self.screenshot(html))
    }
}
