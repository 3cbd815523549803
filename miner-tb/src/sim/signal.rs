//! Single-bit signals with edge detection.
//!
//! A [`Signal`] is a shared wire backed by a `watch` channel. Writers call
//! [`Signal::set`]; readers either sample the level with [`Signal::get`] or
//! take an [`EdgeWatcher`] and await transitions.
//!
//! Every writer in the bench changes a wire at most once per simulated
//! instant, and the paused runtime drains all runnable tasks before time
//! moves, so a watcher never misses an edge.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// The signal's last writer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Signal closed")]
pub struct SignalClosed;

/// A named single-bit wire.
#[derive(Clone)]
pub struct Signal {
    name: Arc<str>,
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    /// Create a signal, initially low.
    pub fn new(name: &str) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            name: Arc::from(name),
            tx: Arc::new(tx),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive the signal. Writing the current level is not an edge.
    pub fn set(&self, level: bool) {
        self.tx.send_if_modified(|current| {
            if *current == level {
                false
            } else {
                *current = level;
                true
            }
        });
    }

    /// Sample the current level.
    pub fn get(&self) -> bool {
        *self.tx.borrow()
    }

    /// Start watching for transitions from the current level on.
    pub fn watch(&self) -> EdgeWatcher {
        EdgeWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("level", &self.get())
            .finish()
    }
}

/// Awaits transitions of one signal.
#[derive(Debug)]
pub struct EdgeWatcher {
    rx: watch::Receiver<bool>,
}

impl EdgeWatcher {
    pub async fn rising_edge(&mut self) -> Result<(), SignalClosed> {
        self.edge(true).await
    }

    pub async fn falling_edge(&mut self) -> Result<(), SignalClosed> {
        self.edge(false).await
    }

    /// Wait until the signal is at `level`, returning at once if it already is.
    pub async fn wait_level(&mut self, level: bool) -> Result<(), SignalClosed> {
        self.rx
            .wait_for(|current| *current == level)
            .await
            .map(|_| ())
            .map_err(|_| SignalClosed)
    }

    async fn edge(&mut self, to: bool) -> Result<(), SignalClosed> {
        loop {
            self.rx.changed().await.map_err(|_| SignalClosed)?;
            if *self.rx.borrow_and_update() == to {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::time::{self, SimDuration, SimTime};

    #[test]
    fn test_set_and_get() {
        let s = Signal::new("i_reset");
        assert!(!s.get());
        s.set(true);
        assert!(s.get());
        assert_eq!(s.name(), "i_reset");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rising_edge_wakes_watcher_at_edge_time() {
        time::start_epoch();
        let s = Signal::new("clk");
        let mut w = s.watch();

        let writer = {
            let s = s.clone();
            tokio::spawn(async move {
                time::sleep(SimDuration::from_ns(5)).await;
                s.set(true);
            })
        };

        w.rising_edge().await.unwrap();
        assert_eq!(time::now(), SimTime::from_ps(5_000));
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_falling_edge_skips_rising_transitions() {
        time::start_epoch();
        let s = Signal::new("ss");
        let mut w = s.watch();

        let writer = {
            let s = s.clone();
            tokio::spawn(async move {
                time::sleep(SimDuration::from_ns(1)).await;
                s.set(true);
                time::sleep(SimDuration::from_ns(1)).await;
                s.set(false);
            })
        };

        w.falling_edge().await.unwrap();
        assert_eq!(time::now(), SimTime::from_ps(2_000));
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_level_returns_immediately_when_satisfied() {
        let s = Signal::new("i_reset");
        let mut w = s.watch();
        w.wait_level(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_watcher_errors_once_signal_dropped() {
        let s = Signal::new("orphan");
        let mut w = s.watch();
        drop(s);
        assert_eq!(w.rising_edge().await, Err(SignalClosed));
    }
}
