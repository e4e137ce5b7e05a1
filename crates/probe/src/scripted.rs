//! Scripted prober for simulations and tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use slumber_core::Result;

use crate::prober::{StatusProber, validate_target};
use crate::types::ProbeReport;

/// Replays queued reports, then repeats a fallback.
#[derive(Debug)]
pub struct ScriptedProber {
    queue: Mutex<VecDeque<ProbeReport>>,
    fallback: Mutex<ProbeReport>,
    calls: AtomicUsize,
}

impl Default for ScriptedProber {
    fn default() -> Self {
        Self::new(ProbeReport::unreachable("no script"))
    }
}

impl ScriptedProber {
    /// Create a prober answering `fallback` once the queue is empty.
    #[must_use]
    pub fn new(fallback: ProbeReport) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: AtomicUsize::new(0),
        }
    }

    /// A reachable report listing `players`.
    pub fn online<I, S>(players: I) -> ProbeReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let players: Vec<String> = players.into_iter().map(Into::into).collect();
        ProbeReport {
            reachable: true,
            online: u32::try_from(players.len()).unwrap_or(u32::MAX),
            max_players: 20,
            players,
            ..ProbeReport::default()
        }
    }

    /// Queue one report.
    pub fn push(&self, report: ProbeReport) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(report);
        }
    }

    /// Replace the fallback.
    pub fn set_fallback(&self, report: ProbeReport) {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = report;
        }
    }

    /// Number of probes answered so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn next_report(&self) -> ProbeReport {
        let queued = self
            .queue
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        queued.unwrap_or_else(|| {
            self.fallback
                .lock()
                .map_or_else(|_| ProbeReport::unreachable("fallback poisoned"), |f| f.clone())
        })
    }
}

#[async_trait]
impl StatusProber for ScriptedProber {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> Result<ProbeReport> {
        validate_target(host, port, timeout)?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.next_report())
    }
}
