//! Storage key generation.
//!
//! Keys look like `<stamp>-<filename>`, where `<stamp>` is a millisecond
//! timestamp that never repeats within one process: if two keys are
//! requested in the same millisecond the second one gets `last + 1`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Longest filename portion kept in a key, in bytes.
const MAX_NAME_BYTES: usize = 200;

#[derive(Debug, Default)]
pub struct KeyGenerator {
    last_stamp: AtomicU64,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a fresh key for `filename`.
    pub fn generate(&self, filename: &str) -> String {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.generate_at(now, filename)
    }

    fn generate_at(&self, now_ms: u64, filename: &str) -> String {
        let stamp = self.next_stamp(now_ms);
        format!("{stamp}-{}", sanitize_filename(filename))
    }

    fn next_stamp(&self, now_ms: u64) -> u64 {
        let prev = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now_ms.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now_ms.max(prev + 1)
    }
}

/// Make a user-supplied filename safe to embed in an object key.
///
/// Path separators and control characters become `_`; `.` and `..` are
/// rewritten so no key component can point upward.  Long names are cut at
/// a character boundary.
pub fn sanitize_filename(filename: &str) -> String {
    let mut out: String = filename
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if out.is_empty() || out == "." || out == ".." {
        out = "file".to_string();
    }

    if out.len() > MAX_NAME_BYTES {
        let mut cut = MAX_NAME_BYTES;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    out
}
