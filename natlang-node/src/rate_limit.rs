//! Sliding-window submission limits.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Submissions per author per window
    #[serde(default = "default_per_author")]
    pub per_author: usize,
    /// Submissions across all authors per window
    #[serde(default = "default_global")]
    pub global: usize,
}

fn default_window_secs() -> u64 { 60 }
fn default_per_author() -> usize { 10 }
fn default_global() -> usize { 100 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            per_author: default_per_author(),
            global: default_global(),
        }
    }
}

/// A rejected submission and when to try again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimited {
    pub scope: LimitScope,
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Author,
    Global,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    /// Authors with hits inside the window; idle authors are swept out
    authors: DashMap<String, VecDeque<Instant>>,
    global: Mutex<VecDeque<Instant>>,
    last_sweep: Mutex<Instant>,
}

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while hits.front().is_some_and(|t| now.duration_since(*t) >= window) {
        hits.pop_front();
    }
}

fn retry_after(hits: &VecDeque<Instant>, now: Instant, window: Duration) -> u64 {
    let oldest = hits.front().copied().unwrap_or(now);
    let remaining = window.saturating_sub(now.duration_since(oldest));
    remaining.as_secs().max(1)
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            authors: DashMap::new(),
            global: Mutex::new(VecDeque::new()),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }

    /// Count one submission by `author`, or refuse it.
    pub fn check(&self, author: &str) -> Result<(), RateLimited> {
        self.check_at(author, Instant::now())
    }

    fn check_at(&self, author: &str, now: Instant) -> Result<(), RateLimited> {
        let window = self.window();
        self.sweep_at(now);
        let mut global = self.global.lock().unwrap_or_else(|e| e.into_inner());
        prune(&mut global, now, window);
        if global.len() >= self.config.global {
            warn!(author, "Global submission limit reached");
            return Err(RateLimited {
                scope: LimitScope::Global,
                retry_after_secs: retry_after(&global, now, window),
            });
        }

        let mut hits = self.authors.entry(author.to_string()).or_default();
        prune(&mut hits, now, window);
        if hits.len() >= self.config.per_author {
            warn!(author, "Author submission limit reached");
            return Err(RateLimited {
                scope: LimitScope::Author,
                retry_after_secs: retry_after(&hits, now, window),
            });
        }

        hits.push_back(now);
        global.push_back(now);
        Ok(())
    }

    /// Drop authors with no hits left in the window, at most once per window.
    ///
    /// Runs before any author entry is held; `retain` locks every shard.
    fn sweep_at(&self, now: Instant) {
        let window = self.window();
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
            if now.saturating_duration_since(*last) < window {
                return;
            }
            *last = now;
        }
        let before = self.authors.len();
        self.authors.retain(|_, hits| {
            prune(hits, now, window);
            !hits.is_empty()
        });
        let swept = before.saturating_sub(self.authors.len());
        if swept > 0 {
            debug!(swept, tracked = self.authors.len(), "Swept idle authors from rate limiter");
        }
    }

    /// Authors currently holding window state.
    pub fn tracked_authors(&self) -> usize {
        self.authors.len()
    }

    /// Submissions `author` may still make in the current window.
    pub fn remaining(&self, author: &str) -> usize {
        let now = Instant::now();
        let used = self
            .authors
            .get_mut(author)
            .map(|mut hits| {
                prune(&mut hits, now, self.window());
                hits.len()
            })
            .unwrap_or(0);
        self.config.per_author.saturating_sub(used)
    }
}
