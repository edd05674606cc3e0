//! Wall-clock time sources

use std::cell::Cell;
use std::rc::Rc;

/// Source of wall-clock time in Unix epoch milliseconds
pub trait Clock {
    fn now_millis(&self) -> u64;
}

/// Real time: `Date.now()` in the browser, `SystemTime` natively
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[cfg(target_arch = "wasm32")]
    fn now_millis(&self) -> u64 {
        js_sys::Date::now() as u64
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually driven clock; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_millis)),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.set(millis);
    }

    pub fn advance(&self, millis: u64) {
        self.now.set(self.now.get().saturating_add(millis));
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.get()
    }
}
