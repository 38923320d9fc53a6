//! The scope's shared bookkeeping: `children`, `next_id`, `starting` from
//! spec.md §3, plus the coordination primitives used in place of the host's
//! assumed transactional memory (see SPEC_FULL.md §0).
//!
//! Mutations happen inside a single [`std::sync::Mutex`] critical section
//! with no `.await` in it, the same way the corpus guards small pieces of
//! shared state behind a plain `Mutex` (e.g. `eth/mod.rs`'s
//! `Arc<Mutex<Option<BlockNumber>>>` end-of-witnessing signal). Waiting for
//! a piece of that state to change is done with `tokio::sync::watch`, the
//! corpus's own tool for "hold the latest value, wake every waiter when it
//! changes" (e.g. `eth/mod.rs`'s `cfe_settings_update_receiver:
//! watch::Receiver<CfeSettings>`) — not `tokio::sync::Notify`, which the
//! corpus never reaches for.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Mutex,
	},
};

use tokio::{sync::watch, task::AbortHandle};

pub(crate) type ChildId = u64;

/// spec.md §3's `starting` counter, collapsed with its `CLOSED` sentinel.
#[derive(Debug)]
enum Starting {
	Open(u64),
	Closed,
}

struct ChildRecord {
	/// Used only by the `Drop` backstop (SPEC_FULL.md §0.1); the graceful
	/// path interrupts children via the `closing` watch below, not by
	/// aborting their tasks.
	abort: AbortHandle,
}

pub(crate) struct Inner {
	children: HashMap<ChildId, ChildRecord>,
	next_id: ChildId,
	starting: Starting,
}

impl Inner {
	fn is_quiescent(&self) -> bool {
		self.children.is_empty() && matches!(self.starting, Starting::Open(0) | Starting::Closed)
	}
}

pub(crate) struct ScopeState<E> {
	inner: Mutex<Inner>,
	/// Bumped every time `inner` changes: admission commit/rollback,
	/// deregistration, or the close transition. Waiters hold their own
	/// `watch::Receiver` and re-check their predicate against a freshly
	/// locked `inner` after every change, so a change that happens between
	/// two checks is never missed.
	changed: watch::Sender<u64>,
	/// Flips to `true` once, when shutdown transitions `starting` to
	/// `Closed`. Children race their action against this to observe the
	/// scope-closure interrupt (spec.md §7 kind 3).
	closing: watch::Sender<bool>,
	closed: AtomicBool,
	/// The first unrecovered failure raised by a propagating child
	/// (spec.md §6). Capturing (`spawn_weak*`) children never write here:
	/// per spec.md §7, `async*` variants only ever propagate kind 2
	/// (asynchronous third-party interruption), which this core has no
	/// producer for (see SPEC_FULL.md §0) — an ordinary capturing-child
	/// failure (kind 1) is always captured-only, regardless of the scope's
	/// close state.
	failure: Mutex<Option<E>>,
	failure_signal: watch::Sender<u64>,
}

impl<E> ScopeState<E> {
	pub(crate) fn new() -> Self {
		Self {
			inner: Mutex::new(Inner {
				children: HashMap::new(),
				next_id: 0,
				starting: Starting::Open(0),
			}),
			changed: watch::Sender::new(0),
			closing: watch::Sender::new(false),
			closed: AtomicBool::new(false),
			failure: Mutex::new(None),
			failure_signal: watch::Sender::new(0),
		}
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	/// spec.md §4.1 admission step 1: reserve a child-id, or fail if the
	/// scope is already closed. Synchronous and instantaneous — no child has
	/// been spawned yet, so there is nothing to roll back on this path.
	pub(crate) fn admit(&self) -> Option<ChildId> {
		let mut guard = self.inner.lock().unwrap();
		match guard.starting {
			Starting::Closed => None,
			Starting::Open(n) => {
				let id = guard.next_id;
				guard.next_id += 1;
				guard.starting = Starting::Open(n + 1);
				Some(id)
			},
		}
	}

	/// spec.md §4.1: the host could not spawn the child after admission
	/// succeeded. Roll back the reservation so no partial state is left.
	pub(crate) fn rollback_admission(&self) {
		let mut guard = self.inner.lock().unwrap();
		if let Starting::Open(n) = guard.starting {
			guard.starting = Starting::Open(n - 1);
		}
		self.bump_changed(guard);
	}

	/// spec.md §4.1 admission step 3: the child has been spawned; make it
	/// visible to shutdown.
	pub(crate) fn commit_admission(&self, id: ChildId, abort: AbortHandle) {
		let mut guard = self.inner.lock().unwrap();
		if let Starting::Open(n) = guard.starting {
			guard.starting = Starting::Open(n - 1);
		}
		guard.children.insert(id, ChildRecord { abort });
		self.bump_changed(guard);
	}

	/// spec.md §4.2 step 5: remove our own entry once it is visible. Retries
	/// because admission's step 3 (above) and this can race: a child may
	/// start running before its own `commit_admission` has executed.
	pub(crate) async fn deregister(&self, id: ChildId) {
		let mut rx = self.changed.subscribe();
		loop {
			{
				let mut guard = self.inner.lock().unwrap();
				if guard.children.remove(&id).is_some() {
					self.bump_changed(guard);
					return;
				}
			}
			rx.changed().await.ok();
		}
	}

	/// spec.md §4.1 shutdown step 1: block until no admission is in
	/// flight, then close. After this returns, every currently- and
	/// future-arriving waiter on [`Self::wait_for_closing`] observes the
	/// scope as closed.
	pub(crate) async fn close(&self) {
		let mut rx = self.changed.subscribe();
		loop {
			{
				let mut guard = self.inner.lock().unwrap();
				if let Starting::Open(0) = guard.starting {
					guard.starting = Starting::Closed;
					drop(guard);
					self.closed.store(true, Ordering::Release);
					let _ = self.closing.send(true);
					tracing::debug!("scope closed, interrupting live children");
					return;
				}
			}
			rx.changed().await.ok();
		}
	}

	/// The join fence (spec.md §4.1 step 3 / §4.4): block until `children`
	/// is empty. Also used by the public, repeatable `Scope::wait`.
	pub(crate) async fn wait_quiescent(&self) {
		let mut rx = self.changed.subscribe();
		loop {
			if self.inner.lock().unwrap().is_quiescent() {
				return;
			}
			rx.changed().await.ok();
		}
	}

	/// Races a child's action against this: resolves once this scope starts
	/// shutting down. Never resolves for a scope that never closes.
	pub(crate) async fn wait_for_closing(&self) {
		if self.is_closed() {
			return;
		}
		let mut rx = self.closing.subscribe();
		loop {
			if *rx.borrow() {
				return;
			}
			if rx.changed().await.is_err() {
				return;
			}
		}
	}

	/// Races the scope's body against this: resolves once a propagating
	/// child records the first unrecovered failure.
	pub(crate) async fn wait_for_failure(&self) {
		let mut rx = self.failure_signal.subscribe();
		loop {
			if self.failure.lock().unwrap().is_some() {
				return;
			}
			rx.changed().await.ok();
		}
	}

	/// Records `e` as the first unrecovered failure, if none is recorded
	/// yet. Called only by propagating children.
	pub(crate) fn propagate(&self, e: E) {
		let mut guard = self.failure.lock().unwrap();
		if guard.is_none() {
			*guard = Some(e);
			drop(guard);
			self.failure_signal.send_modify(|generation| *generation += 1);
		}
	}

	pub(crate) fn take_failure(&self) -> Option<E> {
		self.failure.lock().unwrap().take()
	}

	/// The `Drop` backstop (SPEC_FULL.md §0.1): force-abort every child
	/// still registered. Only ever does anything if the scope's owning
	/// future was itself force-cancelled mid-shutdown; the graceful path
	/// always runs `close` + `wait_quiescent` to completion first, leaving
	/// `children` empty by the time `Scope` drops.
	pub(crate) fn abort_remaining(&self) {
		let mut guard = self.inner.lock().unwrap();
		if guard.children.is_empty() {
			return;
		}
		tracing::warn!(
			count = guard.children.len(),
			"scope dropped without a clean shutdown; force-aborting remaining children"
		);
		for (_, record) in guard.children.drain() {
			record.abort.abort();
		}
		guard.starting = Starting::Closed;
	}

	fn bump_changed(&self, guard: std::sync::MutexGuard<'_, Inner>) {
		drop(guard);
		self.changed.send_modify(|generation| *generation += 1);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn admit_after_close_fails() {
		let state: ScopeState<()> = ScopeState::new();
		state.close().await;
		assert!(state.admit().is_none());
	}

	#[tokio::test]
	async fn rollback_does_not_leave_a_phantom_admission_blocking_close() {
		let state: ScopeState<()> = ScopeState::new();
		let id = state.admit().expect("scope starts open");
		state.rollback_admission();
		// `close` would hang forever if the rollback left `starting` at 1.
		tokio::time::timeout(std::time::Duration::from_millis(200), state.close())
			.await
			.expect("rollback must restore starting to 0");
		let _ = id;
	}

	#[tokio::test]
	async fn quiescence_waits_for_every_registered_child() {
		let state: ScopeState<()> = ScopeState::new();
		let id = state.admit().unwrap();
		state.commit_admission(id, tokio::spawn(std::future::ready(())).abort_handle());

		let waited = tokio::time::timeout(std::time::Duration::from_millis(50), state.wait_quiescent()).await;
		assert!(waited.is_err(), "must not be quiescent while a child is still registered");

		state.deregister(id).await;
		tokio::time::timeout(std::time::Duration::from_millis(200), state.wait_quiescent())
			.await
			.expect("must become quiescent once the only child deregisters");
	}

	#[tokio::test]
	async fn first_failure_wins() {
		let state: ScopeState<&'static str> = ScopeState::new();
		state.propagate("first");
		state.propagate("second");
		assert_eq!(state.take_failure(), Some("first"));
		assert_eq!(state.take_failure(), None);
	}

	#[tokio::test]
	async fn wait_for_closing_resolves_once_closed() {
		let state: ScopeState<()> = ScopeState::new();
		let not_yet = tokio::time::timeout(std::time::Duration::from_millis(50), state.wait_for_closing()).await;
		assert!(not_yet.is_err());
		state.close().await;
		tokio::time::timeout(std::time::Duration::from_millis(50), state.wait_for_closing())
			.await
			.expect("already closed, must resolve immediately");
	}
}
