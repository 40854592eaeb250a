use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_INITIAL_RECONNECT_DELAY_MS: u64 = 500;
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 10_000;

static JITTER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// `min(initial * 2^attempt, max)` for a zero-based reconnect attempt.
pub fn reconnect_delay_ms(attempt: u32, initial_ms: u64, max_ms: u64) -> u64 {
    let shift = attempt.min(63);
    initial_ms.saturating_mul(1_u64 << shift).min(max_ms)
}

pub fn reconnect_delay_ms_with_jitter(
    attempt: u32,
    initial_ms: u64,
    max_ms: u64,
    jitter_enabled: bool,
) -> u64 {
    let base = reconnect_delay_ms(attempt, initial_ms, max_ms);
    if !jitter_enabled || base <= 1 {
        return base;
    }

    // Bounded jitter in [50%, 100%] of the deterministic delay.
    let low = base / 2;
    let width = base.saturating_sub(low);
    let seed = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(17) ^ 0xA24B_AED4_963E_E407;
    low.saturating_add(mixed % width.saturating_add(1))
}
