//! Code image rendering.
//!
//! The login flow never draws anything itself: it hands the scan URL to a
//! [`CodeRenderer`] and forwards whatever bytes come back to the observer.

use anyhow::Result;

pub trait CodeRenderer: Send + Sync {
    /// Render `url` as an image. `None` means the front end shows the URL
    /// some other way.
    fn render(&self, url: &str) -> Result<Option<Vec<u8>>>;
}

/// Renderer for front ends that display the scan URL as text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImage;

impl CodeRenderer for NoImage {
    fn render(&self, _url: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}
