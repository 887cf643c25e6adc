//! Correlation id allocation.

use std::sync::atomic::{AtomicU32, Ordering};

use radiobridge_protocol::Serial;

/// Hands out serials for outgoing requests.
///
/// Serials increase monotonically and wrap from `u32::MAX` back to `1`;
/// the reserved value `0` is never produced. Safe to share across threads:
/// callers allocate on submit while the event loop allocates fresh serials
/// for fallback resubmissions.
#[derive(Debug)]
pub struct SerialAllocator {
    next: AtomicU32,
}

impl SerialAllocator {
    /// Start at `seed` (`0` is bumped to `1`).
    pub fn new(seed: u32) -> Self {
        Self {
            next: AtomicU32::new(seed.max(1)),
        }
    }

    /// Start at a random point so serials do not repeat across restarts.
    pub fn random() -> Self {
        Self::new(rand::random::<u32>() >> 1)
    }

    /// Allocate the next serial.
    pub fn next(&self) -> Serial {
        // fetch_update with an infallible closure always returns Ok.
        let previous = match self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(advance(current))
            }) {
            Ok(value) | Err(value) => value,
        };
        Serial(previous)
    }

    /// The serial the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> Serial {
        Serial(self.next.load(Ordering::Relaxed))
    }
}

fn advance(current: u32) -> u32 {
    if current == u32::MAX {
        1
    } else {
        current + 1
    }
}
