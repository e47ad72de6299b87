//! Per-user event serialisation.
//!
//! Each active user gets an unbounded FIFO queue drained by one worker task,
//! so one user's events are handled strictly in delivery order while
//! different users run concurrently. A worker whose queue stays empty for the
//! session idle timeout removes itself; the next event starts a new one.

use super::Orchestrator;
use crate::channel::InboundEvent;
use crate::session::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct Worker {
    queue: UnboundedSender<InboundEvent>,
    handle: JoinHandle<()>,
}

type Workers = Arc<Mutex<HashMap<UserId, Worker>>>;

/// Routes inbound events to per-user workers.
#[derive(Clone)]
pub struct Dispatcher {
    orchestrator: Orchestrator,
    workers: Workers,
    idle: Duration,
}

impl Dispatcher {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let idle = orchestrator.config().session_idle_timeout;
        Self::with_idle_timeout(orchestrator, idle)
    }

    pub fn with_idle_timeout(orchestrator: Orchestrator, idle: Duration) -> Self {
        Self {
            orchestrator,
            workers: Arc::new(Mutex::new(HashMap::new())),
            idle,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Number of users with a live worker.
    pub fn active_users(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Queue `event` behind the sender's earlier events.
    pub fn submit(&self, event: InboundEvent) {
        let user = event.sender_id.clone();
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);

        let event = match workers.get(&user) {
            Some(worker) => match worker.queue.send(event) {
                Ok(()) => return,
                // The worker is gone (it only exits after leaving the map, so
                // this means it panicked); start a fresh one.
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (queue, rx) = mpsc::unbounded_channel();
        if queue.send(event).is_err() {
            return;
        }
        debug!("Starting worker for {}", user);
        let handle = tokio::spawn(run_worker(
            self.orchestrator.clone(),
            Arc::clone(&self.workers),
            user.clone(),
            rx,
            self.idle,
        ));
        workers.insert(user, Worker { queue, handle });
    }

    /// Stop accepting events, let every worker drain its queue, and wait.
    pub async fn shutdown(self) {
        let workers: Vec<(UserId, Worker)> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        for (user, worker) in workers {
            drop(worker.queue);
            if let Err(e) = worker.handle.await {
                warn!("Worker for {} ended abnormally: {}", user, e);
            }
        }
    }
}

async fn run_worker(
    orchestrator: Orchestrator,
    workers: Workers,
    user: UserId,
    mut rx: UnboundedReceiver<InboundEvent>,
    idle: Duration,
) {
    loop {
        let event = match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => {
                // Leave the map only if nothing slipped in since the timeout.
                let mut map = workers.lock().unwrap_or_else(PoisonError::into_inner);
                match rx.try_recv() {
                    Ok(event) => {
                        drop(map);
                        event
                    }
                    Err(TryRecvError::Empty) => {
                        map.remove(&user);
                        debug!("Worker for {} idle; exiting", user);
                        break;
                    }
                    Err(TryRecvError::Disconnected) => break,
                }
            }
        };

        if let Err(e) = orchestrator.handle(event).await {
            debug!("Event for {} ended with {} error", user, e.kind());
        }
    }
}
