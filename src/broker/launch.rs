//! Foreground launch context — the cold-start intent.
//!
//! Holds the launch URL reported by the activation source and, when
//! configured, the intent file a platform launcher writes before the
//! daemon's clients are up. Either is handed to the runtime once.

use std::io;
use std::path::PathBuf;

use crate::relay::{ActivationContext, DeepLinkRetrievalError};

#[derive(Debug, Default)]
pub struct LaunchContext {
    url: Option<String>,
    intent_file: Option<PathBuf>,
    intent_consumed: bool,
}

impl LaunchContext {
    pub fn new(intent_file: Option<PathBuf>) -> Self {
        Self {
            url: None,
            intent_file,
            intent_consumed: false,
        }
    }

    /// Record a cold-start URL that has not been delivered yet.
    pub fn record(&mut self, url: String) {
        self.url = Some(url);
    }

    /// The recorded URL, without consuming it.
    pub fn peek(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn read_intent_file(&mut self) -> Result<Option<String>, DeepLinkRetrievalError> {
        let Some(path) = self.intent_file.as_ref() else {
            return Ok(None);
        };
        if self.intent_consumed {
            return Ok(None);
        }
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                let err = DeepLinkRetrievalError::new(format!("{}: {e}", path.display()));
                // Reported once; later drains fall through to the pending slot.
                self.intent_consumed = true;
                return Err(err);
            }
        };
        let url = contents.trim();
        if url.is_empty() {
            return Ok(None);
        }
        self.intent_consumed = true;
        Ok(Some(url.to_string()))
    }
}

impl ActivationContext for LaunchContext {
    fn take_launch_url(&mut self) -> Result<Option<String>, DeepLinkRetrievalError> {
        if let Some(url) = self.url.take() {
            return Ok(Some(url));
        }
        self.read_intent_file()
    }
}
