//! Background periodic tasks with cooperative shutdown.
//!
//! Each task owns a [`tokio::time::Interval`] and races every tick against a
//! shared [`CancellationToken`]. The first tick fires immediately, so a sweep
//! registered here also runs once at startup.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owner of the process's periodic maintenance tasks.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown); clone it to tie other
    /// loops to the same lifetime.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Run `tick` every `period` until shutdown.
    ///
    /// A tick that overruns delays the next one instead of bursting.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("{} scheduler started ({}s interval)", name, period.as_secs());

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!("{} tick", name);
                        tick().await;
                    }
                }
            }
            debug!("{} scheduler stopped", name);
        });
        self.handles.push((name, handle));
    }

    /// Cancel every task and wait for it to finish its current tick.
    pub async fn shutdown(self) {
        self.token.cancel();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!("{} scheduler ended abnormally: {}", name, e);
            }
        }
    }
}
