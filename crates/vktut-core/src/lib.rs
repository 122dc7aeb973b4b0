// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Counts presented frames and reports once per `window`.
#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, now: Instant) -> Self {
        Self {
            window,
            frames: 0,
            since: now,
        }
    }

    pub fn frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Drop the partial count, e.g. while the window is paused.
    pub fn reset(&mut self, now: Instant) {
        self.frames = 0;
        self.since = now;
    }

    /// Returns the frame count once the window has elapsed and starts a new one.
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        if now.duration_since(self.since) < self.window {
            return None;
        }
        let frames = self.frames;
        self.reset(now);
        tracing::trace!(frames, "fps window elapsed");
        Some(frames)
    }
}
