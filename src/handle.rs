//! Joinable references to a forked child (spec.md §3 "Thread handle", §4.4).

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::error::{Outcome, Raised};

/// A single-assignment, multi-reader cell holding a child's [`Outcome`].
///
/// Built on `tokio::sync::watch`, the same "hold the latest value, wake
/// every waiter on change" primitive the corpus uses for propagating a value
/// to code that wants to observe it repeatedly (e.g. `eth/mod.rs`'s
/// `cfe_settings_update_receiver: watch::Receiver<CfeSettings>`). Readers
/// require `T: Clone, E: Clone` so the cell can be read "arbitrarily often"
/// (spec.md §3) without consuming it — every real caller in the corpus
/// instantiates `E = anyhow::Error`, which is cheaply `Clone`.
pub(crate) struct OutcomeCell<T, E> {
	value: watch::Sender<Option<Outcome<T, E>>>,
}

impl<T, E> OutcomeCell<T, E> {
	pub(crate) fn new() -> Self {
		Self { value: watch::Sender::new(None) }
	}

	/// spec.md §4.2 step 4. Panics on a second assignment: P3 ("at-most-one
	/// outcome per handle") is an invariant of this crate's own child entry
	/// point, not something callers can violate, so a violation here is a
	/// programmer error in this crate.
	pub(crate) fn set(&self, outcome: Outcome<T, E>) {
		let mut outcome = Some(outcome);
		self.value.send_if_modified(|slot| {
			assert!(slot.is_none(), "outcome cell assigned twice");
			*slot = outcome.take();
			true
		});
	}
}

impl<T: Clone, E: Clone> OutcomeCell<T, E> {
	async fn wait(&self) -> Outcome<T, E> {
		let mut rx = self.value.subscribe();
		loop {
			if let Some(outcome) = rx.borrow().clone() {
				return outcome;
			}
			rx.changed().await.ok();
		}
	}
}

/// A joinable reference to a child forked with a propagating variant
/// (`Scope::spawn_with_handle`, `Scope::spawn_with_handle_with_unmask`).
///
/// `join` re-raises the child's failure rather than handing back the tagged
/// [`Outcome`] — spec.md §4.4.
pub struct ScopedJoinHandle<T, E> {
	task_id: u64,
	cell: Arc<OutcomeCell<T, E>>,
}

impl<T, E> ScopedJoinHandle<T, E> {
	pub(crate) fn new(task_id: u64, cell: Arc<OutcomeCell<T, E>>) -> Self {
		Self { task_id, cell }
	}
}

impl<T: Clone, E: Clone> ScopedJoinHandle<T, E> {
	/// Blocks until the child's outcome cell is set, then either returns its
	/// value or re-raises its failure.
	pub async fn join(&self) -> Result<T, Raised<E>> {
		self.cell.wait().await.into_result()
	}

	/// As `join`, but returns `None` if `duration` elapses first.
	pub async fn join_for(&self, duration: Duration) -> Option<Result<T, Raised<E>>> {
		tokio::time::timeout(duration, self.join()).await.ok()
	}
}

impl<T, E> Clone for ScopedJoinHandle<T, E> {
	fn clone(&self) -> Self {
		Self { task_id: self.task_id, cell: Arc::clone(&self.cell) }
	}
}

impl<T, E> PartialEq for ScopedJoinHandle<T, E> {
	fn eq(&self, other: &Self) -> bool {
		self.task_id == other.task_id
	}
}
impl<T, E> Eq for ScopedJoinHandle<T, E> {}

impl<T, E> PartialOrd for ScopedJoinHandle<T, E> {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}
impl<T, E> Ord for ScopedJoinHandle<T, E> {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.task_id.cmp(&other.task_id)
	}
}

/// A joinable reference to a child forked with a capturing variant
/// (`Scope::spawn_weak_with_handle`, `Scope::spawn_weak_with_handle_with_unmask`).
///
/// `join` always returns the tagged [`Outcome`] verbatim — spec.md §4.4.
pub struct CaptureHandle<T, E> {
	task_id: u64,
	cell: Arc<OutcomeCell<T, E>>,
}

impl<T, E> CaptureHandle<T, E> {
	pub(crate) fn new(task_id: u64, cell: Arc<OutcomeCell<T, E>>) -> Self {
		Self { task_id, cell }
	}
}

impl<T: Clone, E: Clone> CaptureHandle<T, E> {
	pub async fn join(&self) -> Outcome<T, E> {
		self.cell.wait().await
	}

	pub async fn join_for(&self, duration: Duration) -> Option<Outcome<T, E>> {
		tokio::time::timeout(duration, self.join()).await.ok()
	}
}

impl<T, E> Clone for CaptureHandle<T, E> {
	fn clone(&self) -> Self {
		Self { task_id: self.task_id, cell: Arc::clone(&self.cell) }
	}
}

impl<T, E> PartialEq for CaptureHandle<T, E> {
	fn eq(&self, other: &Self) -> bool {
		self.task_id == other.task_id
	}
}
impl<T, E> Eq for CaptureHandle<T, E> {}

impl<T, E> PartialOrd for CaptureHandle<T, E> {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}
impl<T, E> Ord for CaptureHandle<T, E> {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.task_id.cmp(&other.task_id)
	}
}

pub(crate) fn new_cell<T, E>() -> Arc<OutcomeCell<T, E>> {
	Arc::new(OutcomeCell::new())
}
