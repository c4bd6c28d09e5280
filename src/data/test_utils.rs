//! Deterministic helpers for exercising the pipeline without a real
//! vocabulary or network.

use std::{
    collections::HashMap,
    io::Cursor,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use super::{
    fetch::{Download, FetchError, Transport},
    tokenizer::{Tokenizer, TokenizerError},
};

/// One token per character. The space character maps to id 0 so that real
/// zero ids show up next to zero padding.
#[derive(Clone, Copy, Debug, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        Ok(text
            .chars()
            .map(|c| if c == ' ' { 0 } else { c as u32 })
            .collect())
    }
}

/// In-memory transport that serves fixed bodies and counts requests.
#[derive(Debug, Default)]
pub struct MockTransport {
    bodies: HashMap<String, Vec<u8>>,
    send_length: bool,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            send_length: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_body(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.into(), body.into());
        self
    }

    /// Omit the content length, as chunked responses do.
    #[must_use]
    pub fn without_length(mut self) -> Self {
        self.send_length = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl Transport for MockTransport {
    fn get(&self, url: &str) -> Result<Download, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(url.to_string());
        }

        let body = self.bodies.get(url).cloned().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })?;
        Ok(Download {
            content_length: self.send_length.then_some(body.len() as u64),
            body: Box::new(Cursor::new(body)),
        })
    }
}

/// One JSON line in the upstream HellaSwag layout.
#[must_use]
pub fn record_line(ind: u64, ctx: &str, endings: &[&str], label: usize) -> String {
    serde_json::json!({
        "ind": ind,
        "activity_label": "Sitting",
        "ctx_a": ctx,
        "ctx_b": "",
        "ctx": ctx,
        "split": "val",
        "split_type": "indomain",
        "label": label,
        "endings": endings,
        "source_id": format!("activitynet~v_{ind}"),
    })
    .to_string()
}
