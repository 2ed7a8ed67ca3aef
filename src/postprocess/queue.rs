//! Post-processing queue
//!
//! While the application runs, tasks execute right away on the tokio runtime.
//! Once shutdown has begun they go to a FIFO drained by a dedicated OS thread
//! with its own runtime, so transcodes and scripts finish even after the main
//! runtime stops accepting work.

use super::tasks::PostTask;
use crate::recorder::lifecycle::{AppPhase, Lifecycle};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;

#[derive(Default)]
struct WorkerState {
    pending: VecDeque<PostTask>,
    draining: bool,
}

struct Shared {
    worker: Mutex<WorkerState>,
    drained: Notify,
}

pub struct PostProcessingQueue {
    lifecycle: Arc<Lifecycle>,
    inline: Mutex<JoinSet<()>>,
    shared: Arc<Shared>,
}

impl PostProcessingQueue {
    pub fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            lifecycle,
            inline: Mutex::new(JoinSet::new()),
            shared: Arc::new(Shared {
                worker: Mutex::new(WorkerState::default()),
                drained: Notify::new(),
            }),
        }
    }

    /// Run `task` now, or hand it to the shutdown worker
    pub fn enqueue(&self, task: PostTask) {
        match self.lifecycle.phase() {
            AppPhase::Running => {
                tracing::info!("Running post-processing task: {}", task.label());
                let mut inline = self.inline.lock();
                while inline.try_join_next().is_some() {}
                inline.spawn(run(task));
            }
            AppPhase::ShuttingDown => {
                tracing::info!("Queueing post-processing task for background worker: {}", task.label());
                let start_worker = {
                    let mut state = self.shared.worker.lock();
                    state.pending.push_back(task);
                    !std::mem::replace(&mut state.draining, true)
                };
                if start_worker {
                    self.start_worker();
                }
            }
        }
    }

    /// Tasks waiting for the shutdown worker
    pub fn pending(&self) -> usize {
        self.shared.worker.lock().pending.len()
    }

    fn start_worker(&self) {
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("post-processing".into())
            .spawn(move || drain(shared));

        if let Err(e) = spawned {
            tracing::error!("Failed to start post-processing worker: {}", e);
            let mut state = self.shared.worker.lock();
            let dropped = state.pending.len();
            state.pending.clear();
            state.draining = false;
            drop(state);
            tracing::error!("Dropped {} post-processing tasks", dropped);
            self.shared.drained.notify_waiters();
        }
    }

    /// Wait until inline tasks have finished and the worker queue is empty.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.drained()).await.is_ok()
    }

    /// Wait without a bound
    pub async fn drained(&self) {
        let mut inline = std::mem::take(&mut *self.inline.lock());
        while let Some(result) = inline.join_next().await {
            if let Err(e) = result {
                tracing::error!("Post-processing task panicked: {}", e);
            }
        }

        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.shared.worker.lock();
                if !state.draining && state.pending.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }
}

async fn run(task: PostTask) {
    let label = task.label();
    if let Err(e) = task.execute().await {
        tracing::error!("Post-processing task '{}' failed: {}", label, e);
    }
}

fn drain(shared: Arc<Shared>) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build();
    let runtime = match runtime {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            tracing::error!("Post-processing worker could not build a runtime: {}", e);
            None
        }
    };

    loop {
        let task = {
            let mut state = shared.worker.lock();
            match (state.pending.pop_front(), runtime.as_ref()) {
                (Some(task), Some(_)) => task,
                (Some(_), None) => {
                    state.pending.clear();
                    state.draining = false;
                    break;
                }
                (None, _) => {
                    state.draining = false;
                    break;
                }
            }
        };
        if let Some(runtime) = runtime.as_ref() {
            runtime.block_on(run(task));
        }
    }

    tracing::info!("Post-processing worker finished");
    shared.drained.notify_waiters();
}
