use std::collections::HashMap;
use std::sync::Mutex;
use sha2::{Sha256, Digest};
use shared::protocol::{LOG_CHUNK_LIMIT, NO_LOGS, TRUNCATION_MARKER};

/// SHA-256 of the log text, hex encoded.
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Cuts `text` to `limit` characters and appends the truncation marker, so
/// the result is always a prefix of the input plus the marker.
pub fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

/// Remembers, per service, the fingerprint of the last forwarded log window.
///
/// This is dedup by whole-window hash, not a diff: an overlapping window that
/// repeats earlier lines but adds one new line counts as entirely new, and an
/// identical window is suppressed entirely.
pub struct LogDeduplicator {
    fingerprints: Mutex<HashMap<String, String>>,
    limit: usize,
}

impl LogDeduplicator {
    pub fn new() -> Self {
        Self::with_limit(LOG_CHUNK_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            fingerprints: Mutex::new(HashMap::new()),
            limit,
        }
    }

    /// Returns the text to forward, or None when it was already forwarded
    /// or there is nothing worth sending. The check and the store happen
    /// under one lock acquisition so two concurrent callers cannot both
    /// forward the same window.
    pub fn check_new(&self, service: &str, window_text: &str) -> Option<String> {
        let trimmed = window_text.trim();
        if trimmed.is_empty() || trimmed == NO_LOGS {
            return None;
        }

        let hash = fingerprint(window_text);
        let mut fingerprints = self
            .fingerprints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if fingerprints.get(service) == Some(&hash) {
            tracing::debug!("No new logs for {}", service);
            return None;
        }
        fingerprints.insert(service.to_string(), hash);
        drop(fingerprints);

        Some(truncate(window_text, self.limit))
    }

    #[cfg(test)]
    pub fn fingerprint_of(&self, service: &str) -> Option<String> {
        self.fingerprints.lock().unwrap().get(service).cloned()
    }
}

impl Default for LogDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}
