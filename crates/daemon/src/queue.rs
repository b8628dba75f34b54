//! Per-folder task queue.
//!
//! Tasks drain in lexicographic path order. Paths re-enqueued by watch
//! events during a drain go to a follow-up tier that is only consulted
//! once the current batch is exhausted. Retrying tasks wait in a delayed
//! tier until their backoff expires.

use docshelf_core::Task;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct TaskQueue {
  pending: VecDeque<Task>,
  followup: Vec<Task>,
  delayed: Vec<(Instant, Task)>,
}

impl TaskQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Enqueue a scan batch, sorted by path.
  pub fn enqueue_batch(&mut self, mut tasks: Vec<Task>) {
    tasks.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    self.pending.extend(tasks);
  }

  /// Enqueue a single task behind the current batch.
  pub fn enqueue_followup(&mut self, task: Task) {
    self.followup.push(task);
  }

  /// Park a retrying task until `ready_at`.
  pub fn enqueue_delayed(&mut self, task: Task, ready_at: Instant) {
    self.delayed.push((ready_at, task));
  }

  /// Next runnable task, honoring batch order and backoff deadlines.
  pub fn pop_ready(&mut self, now: Instant) -> Option<Task> {
    // Expired delays rejoin the front tier first.
    let mut expired: Vec<Task> = Vec::new();
    self.delayed.retain(|(ready_at, task)| {
      if *ready_at <= now {
        expired.push(task.clone());
        false
      } else {
        true
      }
    });
    if !expired.is_empty() {
      expired.sort_by(|a, b| a.file_path.cmp(&b.file_path));
      for task in expired.into_iter().rev() {
        self.pending.push_front(task);
      }
    }

    if let Some(task) = self.pending.pop_front() {
      return Some(task);
    }

    // Current batch exhausted: promote the follow-up tier.
    if !self.followup.is_empty() {
      let mut followup = std::mem::take(&mut self.followup);
      followup.sort_by(|a, b| a.file_path.cmp(&b.file_path));
      self.pending.extend(followup);
      return self.pending.pop_front();
    }

    None
  }

  /// Time until the earliest delayed task becomes runnable.
  pub fn next_delay(&self, now: Instant) -> Option<Duration> {
    self
      .delayed
      .iter()
      .map(|(ready_at, _)| ready_at.saturating_duration_since(now))
      .min()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty() && self.followup.is_empty() && self.delayed.is_empty()
  }

  pub fn len(&self) -> usize {
    self.pending.len() + self.followup.len() + self.delayed.len()
  }

  /// Drop everything; used by dispose.
  pub fn clear(&mut self) {
    self.pending.clear();
    self.followup.clear();
    self.delayed.clear();
  }
}

/// Exponential backoff for task retries: 250ms × 2^(attempt−1), capped.
pub fn retry_backoff(attempt: u32) -> Duration {
  let base = Duration::from_millis(250);
  let capped = base.saturating_mul(1u32 << attempt.saturating_sub(1).min(6));
  capped.min(Duration::from_secs(8))
}
