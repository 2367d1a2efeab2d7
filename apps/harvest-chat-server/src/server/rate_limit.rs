use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use uuid::Uuid;

/// Fixed-window message-rate guard, keyed per connection. A window
/// starts on the first call for a connection and resets once its length
/// has fully elapsed; within a window the counter never advances past
/// the cap, so sustained abuse cannot overflow it. State for a
/// connection must be `forget`ten when the connection goes away.
#[derive(Debug)]
pub(crate) struct FixedWindowLimiter {
    window: Duration,
    max_events: u32,
    windows: HashMap<Uuid, WindowState>,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started: Instant,
    count: u32,
}

impl FixedWindowLimiter {
    pub(crate) fn new(window: Duration, max_events: u32) -> Self {
        Self {
            window,
            max_events,
            windows: HashMap::new(),
        }
    }

    pub(crate) fn allow(&mut self, connection_id: Uuid) -> bool {
        self.allow_at(connection_id, Instant::now())
    }

    pub(crate) fn allow_at(&mut self, connection_id: Uuid, now: Instant) -> bool {
        let state = self.windows.entry(connection_id).or_insert(WindowState {
            started: now,
            count: 0,
        });

        if now.duration_since(state.started) >= self.window {
            state.started = now;
            state.count = 1;
            return true;
        }

        if state.count >= self.max_events {
            return false;
        }
        state.count += 1;
        true
    }

    pub(crate) fn forget(&mut self, connection_id: Uuid) {
        self.windows.remove(&connection_id);
    }

    pub(crate) fn tracked_connections(&self) -> usize {
        self.windows.len()
    }
}
