//! Single-threaded delay scheduler.
//!
//! Backoff-delayed reconnects and keepalive deadlines both run here, so the
//! two never race each other for the same logical connection. The scheduler
//! owns its own current-thread runtime on a dedicated OS thread; I/O stays on
//! the caller's runtime.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, error};

use st_core::error::{StError, StResult};

type TaskRegistry = Arc<Mutex<Registry>>;

struct Registry {
    shut_down: bool,
    tasks: HashMap<u64, AbortHandle>,
}

/// Runs one-shot callbacks after a delay.
pub struct Scheduler {
    name: String,
    handle: Handle,
    registry: TaskRegistry,
    next_id: AtomicU64,
    /// Stops the dedicated thread; `None` for schedulers borrowing a runtime.
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Scheduler {
    /// Start a scheduler on its own thread with a current-thread runtime.
    pub fn dedicated(name: &str) -> StResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .thread_name(name)
            .build()
            .map_err(|e| StError::Internal(format!("failed to build scheduler runtime: {e}")))?;
        let handle = runtime.handle().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // Resolves on an explicit stop or when the scheduler is dropped.
                let _ = runtime.block_on(stop_rx);
            })
            .map_err(|e| StError::Internal(format!("failed to spawn scheduler thread: {e}")))?;

        debug!("scheduler '{}' started", name);
        Ok(Self::with_parts(name, handle, Some(stop_tx)))
    }

    /// Schedule on an existing runtime instead of a dedicated thread.
    pub fn from_handle(name: &str, handle: Handle) -> Self {
        Self::with_parts(name, handle, None)
    }

    fn with_parts(name: &str, handle: Handle, stop_tx: Option<oneshot::Sender<()>>) -> Self {
        Self {
            name: name.to_string(),
            handle,
            registry: Arc::new(Mutex::new(Registry {
                shut_down: false,
                tasks: HashMap::new(),
            })),
            next_id: AtomicU64::new(1),
            stop_tx: Mutex::new(stop_tx),
        }
    }

    /// Run `task` once after `delay`. Returns `None` once the scheduler is shut down.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> Option<ScheduledTask>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.registry);
        let name = self.name.clone();

        // Held across spawn so the task cannot deregister before it is registered.
        let mut guard = self.registry.lock();
        if guard.shut_down {
            return None;
        }

        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            registry.lock().tasks.remove(&id);
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!("scheduled task {} on '{}' panicked", id, name);
            }
        });
        let abort = join.abort_handle();
        guard.tasks.insert(id, abort.clone());

        Some(ScheduledTask {
            id,
            abort,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Number of tasks scheduled but not yet run or cancelled.
    pub fn pending(&self) -> usize {
        self.registry.lock().tasks.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.registry.lock().shut_down
    }

    /// Cancel everything pending and refuse new work. Idempotent.
    pub fn shutdown(&self) {
        let drained: Vec<AbortHandle> = {
            let mut guard = self.registry.lock();
            if guard.shut_down {
                return;
            }
            guard.shut_down = true;
            guard.tasks.drain().map(|(_, h)| h).collect()
        };
        for handle in &drained {
            handle.abort();
        }
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }
        debug!(
            "scheduler '{}' shut down ({} pending task(s) cancelled)",
            self.name,
            drained.len()
        );
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a scheduled callback.
#[derive(Debug)]
pub struct ScheduledTask {
    id: u64,
    abort: AbortHandle,
    registry: TaskRegistry,
}

impl ScheduledTask {
    /// Best-effort cancel; a callback already running is not interrupted.
    pub fn cancel(&self) {
        self.abort.abort();
        self.registry.lock().tasks.remove(&self.id);
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("shut_down", &self.shut_down)
            .field("pending", &self.tasks.len())
            .finish()
    }
}
