//! Terminal presentation of a login attempt.

use crate::OutputFormat;
use qrlogin_core::{LoginObserver, Outcome};
use std::sync::Mutex;

/// Prints attempt progress to stdout and keeps the final outcome for the
/// command to inspect once the attempt is over.
pub struct TerminalObserver {
    format: OutputFormat,
    last_status: Mutex<Option<String>>,
    outcome: Mutex<Option<Outcome>>,
}

impl TerminalObserver {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            last_status: Mutex::new(None),
            outcome: Mutex::new(None),
        }
    }

    pub fn take_outcome(&self) -> Option<Outcome> {
        self.outcome.lock().ok().and_then(|mut o| o.take())
    }
}

impl LoginObserver for TerminalObserver {
    fn on_status(&self, text: &str) {
        if let Ok(mut last) = self.last_status.lock() {
            if last.as_deref() == Some(text) {
                return;
            }
            *last = Some(text.to_string());
        }

        match self.format {
            OutputFormat::Text => println!("  {}", text),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "event": "status",
                        "text": text,
                    })
                );
            }
        }
    }

    fn on_image(&self, image: Option<&[u8]>) {
        if let Some(bytes) = image {
            tracing::debug!("Received a {} byte code image", bytes.len());
        }
    }

    fn on_scan_url(&self, url: &str) {
        match self.format {
            OutputFormat::Text => {
                println!();
                println!("Open this URL in the mobile app or turn it into a QR code:\n\n{}\n", url);
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "event": "awaiting_scan",
                        "scan_url": url,
                    })
                );
            }
        }
    }

    fn on_outcome(&self, outcome: &Outcome) {
        if let Ok(mut slot) = self.outcome.lock() {
            *slot = Some(outcome.clone());
        }
    }
}
