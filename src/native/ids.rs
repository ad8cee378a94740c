use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::core::traits::ids::IdGenerator;

/// Millisecond timestamp followed by a random suffix, e.g. `1700000000000_3f2a9c1e`.
#[derive(Clone, Debug, Default)]
pub struct TimestampIds;

impl IdGenerator for TimestampIds {
    fn next_id(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}",
            chrono::Utc::now().timestamp_millis(),
            &suffix[..8]
        )
    }
}

/// Deterministic ids `<prefix>1`, `<prefix>2`, ...
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.prefix, id)
    }
}
