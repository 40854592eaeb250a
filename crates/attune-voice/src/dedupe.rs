use std::collections::HashMap;

/// Sliding-window memory of recently forwarded signatures.
#[derive(Debug, Clone, Default)]
pub struct DedupeCache {
    window_ms: u64,
    bound: usize,
    sent_at: HashMap<String, u64>,
}

impl DedupeCache {
    pub fn new(window_ms: u64, bound: usize) -> Self {
        Self {
            window_ms,
            bound,
            sent_at: HashMap::new(),
        }
    }

    /// Records `signature` at `now_ms` unless it was already recorded inside
    /// the window. Returns `false` for a suppressed duplicate.
    pub fn admit(&mut self, signature: &str, now_ms: u64) -> bool {
        if let Some(last_sent) = self.sent_at.get(signature) {
            if now_ms.saturating_sub(*last_sent) < self.window_ms {
                return false;
            }
        }
        self.sent_at.insert(signature.to_string(), now_ms);
        if self.sent_at.len() > self.bound {
            let cutoff = now_ms.saturating_sub(self.window_ms);
            self.sent_at.retain(|_, sent_at| *sent_at >= cutoff);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.sent_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent_at.is_empty()
    }

    pub fn clear(&mut self) {
        self.sent_at.clear();
    }
}
