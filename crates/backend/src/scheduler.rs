//! TaskScheduler - per-key FIFO queues of deferred work drained by a fixed
//! worker pool.
//!
//! A key is handed to at most one worker at a time: when a task is queued
//! for an idle key, the key is published on the ready channel and marked
//! running. The worker that picks it up runs exactly one task, then either
//! republishes the key (more tasks queued) or marks it idle. Tasks for the
//! same key therefore run in enqueue order and never overlap, while
//! different keys spread across workers.
//!
//! Task bodies run on the blocking pool. An error or a panic is logged and
//! the task dropped; the key's remaining tasks still run.

use std::{
  collections::{HashMap, VecDeque},
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, trace, warn};

pub type TaskResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
  #[error("Scheduler is shut down")]
  ShutDown,
}

/// A unit of deferred work.
pub struct Task {
  label: String,
  body: Box<dyn FnOnce() -> TaskResult + Send + 'static>,
}

impl Task {
  pub fn new(label: impl Into<String>, body: impl FnOnce() -> TaskResult + Send + 'static) -> Self {
    Self {
      label: label.into(),
      body: Box::new(body),
    }
  }

  pub fn label(&self) -> &str {
    &self.label
  }
}

impl std::fmt::Debug for Task {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Task").field("label", &self.label).finish_non_exhaustive()
  }
}

#[derive(Default)]
struct KeyQueue {
  tasks: VecDeque<Task>,
  running: bool,
}

struct Inner {
  queues: Mutex<HashMap<String, KeyQueue>>,
  ready_tx: mpsc::UnboundedSender<String>,
  pending: AtomicUsize,
  idle: Notify,
  cancel: CancellationToken,
}

impl Inner {
  /// Run the head task of `key`, then hand the key back or release it.
  async fn run_next(&self, key: &str) {
    let task = self.queues.lock().get_mut(key).and_then(|q| q.tasks.pop_front());
    let Some(task) = task else {
      // Nothing queued; release the key so the next add republishes it.
      if let Some(q) = self.queues.lock().get_mut(key) {
        q.running = false;
      }
      return;
    };

    let Task { label, body } = task;
    trace!(key, task = %label, "Running deferred task");
    match tokio::task::spawn_blocking(body).await {
      Ok(Ok(())) => debug!(key, task = %label, "Deferred task completed"),
      Ok(Err(e)) => error!(key, task = %label, error = %e, "Deferred task failed, dropping"),
      Err(e) => error!(key, task = %label, error = %e, "Deferred task panicked, dropping"),
    }

    let republish = match self.queues.lock().get_mut(key) {
      Some(q) if !q.tasks.is_empty() => true,
      Some(q) => {
        q.running = false;
        false
      }
      None => false,
    };
    if republish && self.ready_tx.send(key.to_string()).is_err() {
      debug!(key, "Ready channel closed, leaving queued tasks");
    }

    if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
      self.idle.notify_waiters();
    }
  }
}

pub struct TaskScheduler {
  inner: Arc<Inner>,
  workers: usize,
  tracker: TaskTracker,
}

impl TaskScheduler {
  /// Start a scheduler with `workers` workers (at least one) on the current runtime.
  pub fn start(workers: usize) -> Self {
    let workers = workers.max(1);
    let (ready_tx, ready_rx) = mpsc::unbounded_channel();
    let inner = Arc::new(Inner {
      queues: Mutex::new(HashMap::new()),
      ready_tx,
      pending: AtomicUsize::new(0),
      idle: Notify::new(),
      cancel: CancellationToken::new(),
    });

    let ready_rx = Arc::new(AsyncMutex::new(ready_rx));
    let tracker = TaskTracker::new();
    for worker in 0..workers {
      let inner = Arc::clone(&inner);
      let ready_rx = Arc::clone(&ready_rx);
      tracker.spawn(async move {
        loop {
          let key = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            key = async { ready_rx.lock().await.recv().await } => match key {
              Some(key) => key,
              None => break,
            },
          };
          inner.run_next(&key).await;
        }
        trace!(worker, "Scheduler worker stopped");
      });
    }
    tracker.close();

    info!(workers, "Task scheduler started");
    Self { inner, workers, tracker }
  }

  pub fn workers(&self) -> usize {
    self.workers
  }

  /// Append `task` to the FIFO queue of `key`. Fails once
  /// [`shutdown`](Self::shutdown) has begun.
  pub fn add_task(&self, task: Task, key: &str) -> Result<(), SchedulerError> {
    let publish = {
      // Checked under the queue lock: shutdown cancels while holding it, so a
      // task is either refused here or counted as queued when workers stop.
      let mut queues = self.inner.queues.lock();
      if self.inner.cancel.is_cancelled() {
        return Err(SchedulerError::ShutDown);
      }
      self.inner.pending.fetch_add(1, Ordering::AcqRel);
      let queue = queues.entry(key.to_string()).or_default();
      trace!(key, task = %task.label, queued = queue.tasks.len(), "Queued deferred task");
      queue.tasks.push_back(task);
      !std::mem::replace(&mut queue.running, true)
    };

    if publish && self.inner.ready_tx.send(key.to_string()).is_err() {
      self.inner.pending.fetch_sub(1, Ordering::AcqRel);
      return Err(SchedulerError::ShutDown);
    }
    Ok(())
  }

  /// Tasks queued or running across all keys.
  pub fn pending(&self) -> usize {
    self.inner.pending.load(Ordering::Acquire)
  }

  /// Tasks waiting (not yet started) for `key`.
  pub fn queued(&self, key: &str) -> usize {
    self.inner.queues.lock().get(key).map(|q| q.tasks.len()).unwrap_or(0)
  }

  /// Resolve once every queued task has run.
  pub async fn wait_idle(&self) {
    loop {
      let notified = self.inner.idle.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      if self.pending() == 0 {
        return;
      }
      notified.await;
    }
  }

  /// Stop accepting tasks and wait for the workers to exit. Tasks accepted
  /// before the call but not yet run are dropped and counted in the log;
  /// call [`wait_idle`](Self::wait_idle) first to drain.
  pub async fn shutdown(&self) {
    {
      let _queues = self.inner.queues.lock();
      self.inner.cancel.cancel();
    }
    self.tracker.wait().await;
    let dropped = self.pending();
    if dropped > 0 {
      warn!(dropped, "Task scheduler stopped with queued tasks");
    } else {
      info!("Task scheduler stopped");
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{Mutex as StdMutex, mpsc as std_mpsc},
    time::Duration,
  };

  use pretty_assertions::assert_eq;

  use super::*;

  fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(String) -> Task) {
    let log = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let make = move |entry: String| {
      let sink = Arc::clone(&sink);
      Task::new(entry.clone(), move || {
        sink.lock().unwrap().push(entry);
        Ok(())
      })
    };
    (log, make)
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_same_key_runs_in_enqueue_order() {
    let scheduler = TaskScheduler::start(4);
    let (log, task) = recorder();

    for i in 0..50 {
      scheduler.add_task(task(format!("t{}", i)), "books").unwrap();
    }
    scheduler.wait_idle().await;

    let expected: Vec<String> = (0..50).map(|i| format!("t{}", i)).collect();
    assert_eq!(*log.lock().unwrap(), expected);
    assert_eq!(scheduler.pending(), 0);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_same_key_never_overlaps() {
    let scheduler = TaskScheduler::start(4);
    let active = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    for i in 0..20 {
      let active = Arc::clone(&active);
      let max_seen = Arc::clone(&max_seen);
      let task = Task::new(format!("t{}", i), move || {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max_seen.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(2));
        active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
      });
      scheduler.add_task(task, "books").unwrap();
    }
    scheduler.wait_idle().await;

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_different_keys_run_concurrently() {
    let scheduler = TaskScheduler::start(2);
    let (a_tx, a_rx) = std_mpsc::channel::<()>();
    let (b_tx, b_rx) = std_mpsc::channel::<()>();
    let met = Arc::new(AtomicUsize::new(0));

    // Each task signals the other and waits for its signal; both only see
    // it when they run at the same time.
    let met_a = Arc::clone(&met);
    scheduler
      .add_task(
        Task::new("a", move || {
          let _ = b_tx.send(());
          if a_rx.recv_timeout(Duration::from_secs(5)).is_ok() {
            met_a.fetch_add(1, Ordering::SeqCst);
          }
          Ok(())
        }),
        "books",
      )
      .unwrap();
    let met_b = Arc::clone(&met);
    scheduler
      .add_task(
        Task::new("b", move || {
          let _ = a_tx.send(());
          if b_rx.recv_timeout(Duration::from_secs(5)).is_ok() {
            met_b.fetch_add(1, Ordering::SeqCst);
          }
          Ok(())
        }),
        "movies",
      )
      .unwrap();

    scheduler.wait_idle().await;
    assert_eq!(met.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_failed_and_panicking_tasks_are_dropped() {
    let scheduler = TaskScheduler::start(1);
    let (log, task) = recorder();

    scheduler.add_task(task("before".into()), "books").unwrap();
    scheduler
      .add_task(Task::new("fails", || Err("backend rejected".into())), "books")
      .unwrap();
    scheduler
      .add_task(Task::new("panics", || panic!("boom")), "books")
      .unwrap();
    scheduler.add_task(task("after".into()), "books").unwrap();
    scheduler.wait_idle().await;

    assert_eq!(*log.lock().unwrap(), vec!["before".to_string(), "after".to_string()]);
  }

  #[tokio::test]
  async fn test_wait_idle_on_empty_scheduler_returns() {
    let scheduler = TaskScheduler::start(1);
    scheduler.wait_idle().await;
    assert_eq!(scheduler.queued("books"), 0);
  }

  #[tokio::test]
  async fn test_add_after_shutdown_is_rejected() {
    let scheduler = TaskScheduler::start(2);
    scheduler.shutdown().await;

    let err = scheduler.add_task(Task::new("late", || Ok(())), "books").unwrap_err();
    assert_eq!(err, SchedulerError::ShutDown);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_tasks_racing_shutdown_are_refused_or_accounted() {
    let scheduler = Arc::new(TaskScheduler::start(2));
    let ran = Arc::new(AtomicUsize::new(0));

    let adder = {
      let scheduler = Arc::clone(&scheduler);
      let ran = Arc::clone(&ran);
      tokio::task::spawn_blocking(move || {
        let mut accepted = 0;
        for i in 0..2000 {
          let ran = Arc::clone(&ran);
          let task = Task::new(format!("t{}", i), move || {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
          });
          if scheduler.add_task(task, &format!("k{}", i % 4)).is_ok() {
            accepted += 1;
          }
        }
        accepted
      })
    };

    tokio::time::sleep(Duration::from_millis(1)).await;
    scheduler.shutdown().await;
    let accepted = adder.await.unwrap();

    // Whatever was accepted either ran or is still counted as queued.
    assert_eq!(accepted, ran.load(Ordering::SeqCst) + scheduler.pending());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn test_key_is_reused_after_draining() {
    let scheduler = TaskScheduler::start(2);
    let (log, task) = recorder();

    scheduler.add_task(task("first".into()), "books").unwrap();
    scheduler.wait_idle().await;
    scheduler.add_task(task("second".into()), "books").unwrap();
    scheduler.wait_idle().await;

    assert_eq!(*log.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
  }
}
