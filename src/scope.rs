//! The scope itself: the eight fork variants (spec.md §4.3), the join fence,
//! and the two ways to open a scope (spec.md §5).

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;

use crate::{
	child::{run_capturing, run_capturing_masked, run_propagating, run_propagating_masked, Unmask},
	error::{Error, Outcome},
	handle::{self, CaptureHandle, ScopedJoinHandle},
	state::ScopeState,
};

/// A handle to a structured-concurrency scope. Every child forked through it
/// is guaranteed to be interrupted and fully joined before the call that
/// opened this scope ([`task_scope`] or [`with_task_scope`]) returns —
/// spec.md §2 invariant P1.
///
/// Cloning a `Scope` is cheap and shares the same underlying bookkeeping;
/// this is how a child forks its own grandchildren onto the same scope its
/// parent belongs to.
pub struct Scope<E> {
	state: Arc<ScopeState<E>>,
}

impl<E> Clone for Scope<E> {
	fn clone(&self) -> Self {
		Self { state: Arc::clone(&self.state) }
	}
}

impl<E> Scope<E>
where
	E: Send + Sync + 'static,
{
	fn new() -> Self {
		Self { state: Arc::new(ScopeState::new()) }
	}

	/// spec.md §4.1 admission: reserve a slot, or fail synchronously if the
	/// scope is already shutting down.
	fn begin_fork(&self) -> Result<u64, Error<E>> {
		self.state.admit().ok_or(Error::ScopeClosed)
	}

	/// spec.md §4.2: spawn the task, commit the admission once it is visible
	/// to tokio, and roll back if spawning itself panics before that point.
	fn spawn_task<T, Fut>(&self, id: u64, body: Fut) -> Result<(), Error<E>>
	where
		T: Send + 'static,
		Fut: Future<Output = T> + Send + 'static,
	{
		let state = Arc::clone(&self.state);
		let spawn_result =
			std::panic::catch_unwind(AssertUnwindSafe(|| tokio::spawn(run_child(state, id, body))));
		match spawn_result {
			Ok(join_handle) => {
				self.state.commit_admission(id, join_handle.abort_handle());
				Ok(())
			},
			Err(payload) => {
				self.state.rollback_admission();
				std::panic::resume_unwind(payload);
			},
		}
	}

	/// Forks `action` as a propagating child: its failure preempts the
	/// scope's body (spec.md §6), and its outcome is not observable.
	pub fn spawn<Fut>(&self, action: Fut) -> Result<(), Error<E>>
	where
		Fut: Future<Output = Result<(), E>> + Send + 'static,
		E: Clone,
	{
		let id = self.begin_fork()?;
		let state = Arc::clone(&self.state);
		self.spawn_task::<(), _>(id, async move {
			run_propagating(&state, action).await;
		})
	}

	/// As [`Self::spawn`], but returns a [`ScopedJoinHandle`] that re-raises
	/// the child's failure on `join`.
	pub fn spawn_with_handle<T, Fut>(&self, action: Fut) -> Result<ScopedJoinHandle<T, E>, Error<E>>
	where
		T: Send + Clone + 'static,
		Fut: Future<Output = Result<T, E>> + Send + 'static,
		E: Clone,
	{
		let id = self.begin_fork()?;
		let cell = handle::new_cell();
		let state = Arc::clone(&self.state);
		let cell_for_task = Arc::clone(&cell);
		self.spawn_task::<(), _>(id, async move {
			let outcome = run_propagating(&state, action).await;
			cell_for_task.set(outcome);
		})?;
		Ok(ScopedJoinHandle::new(id, cell))
	}

	/// As [`Self::spawn`], but `action` chooses for itself, via the
	/// [`Unmask`] it is given, which parts of its own execution can be
	/// interrupted early.
	pub fn spawn_with_unmask<F, Fut>(&self, action: F) -> Result<(), Error<E>>
	where
		F: FnOnce(Unmask<'_, E>) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), E>> + Send,
		E: Clone,
	{
		let id = self.begin_fork()?;
		let state = Arc::clone(&self.state);
		self.spawn_task::<(), _>(id, async move {
			run_propagating_masked(&state, action).await;
		})
	}

	/// As [`Self::spawn_with_handle`], with the masking of
	/// [`Self::spawn_with_unmask`].
	pub fn spawn_with_handle_with_unmask<T, F, Fut>(
		&self,
		action: F,
	) -> Result<ScopedJoinHandle<T, E>, Error<E>>
	where
		T: Send + Clone + 'static,
		F: FnOnce(Unmask<'_, E>) -> Fut + Send + 'static,
		Fut: Future<Output = Result<T, E>> + Send,
		E: Clone,
	{
		let id = self.begin_fork()?;
		let cell = handle::new_cell();
		let state = Arc::clone(&self.state);
		let cell_for_task = Arc::clone(&cell);
		self.spawn_task::<(), _>(id, async move {
			let outcome = run_propagating_masked(&state, action).await;
			cell_for_task.set(outcome);
		})?;
		Ok(ScopedJoinHandle::new(id, cell))
	}

	/// Forks `action` as a capturing child: its failure never preempts the
	/// scope's body, and its outcome is simply discarded once produced.
	pub fn spawn_weak<Fut>(&self, action: Fut) -> Result<(), Error<E>>
	where
		Fut: Future<Output = Result<(), E>> + Send + 'static,
	{
		let id = self.begin_fork()?;
		let state = Arc::clone(&self.state);
		self.spawn_task::<(), _>(id, async move {
			run_capturing(&state, action).await;
		})
	}

	/// As [`Self::spawn_weak`], but returns a [`CaptureHandle`] whose `join`
	/// yields the child's full tagged [`Outcome`].
	pub fn spawn_weak_with_handle<T, Fut>(&self, action: Fut) -> Result<CaptureHandle<T, E>, Error<E>>
	where
		T: Send + Clone + 'static,
		Fut: Future<Output = Result<T, E>> + Send + 'static,
		E: Clone,
	{
		let id = self.begin_fork()?;
		let cell = handle::new_cell();
		let state = Arc::clone(&self.state);
		let cell_for_task = Arc::clone(&cell);
		self.spawn_task::<(), _>(id, async move {
			let outcome = run_capturing(&state, action).await;
			cell_for_task.set(outcome);
		})?;
		Ok(CaptureHandle::new(id, cell))
	}

	/// As [`Self::spawn_weak`], with the masking of [`Self::spawn_with_unmask`].
	pub fn spawn_weak_with_unmask<F, Fut>(&self, action: F) -> Result<(), Error<E>>
	where
		F: FnOnce(Unmask<'_, E>) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), E>> + Send,
	{
		let id = self.begin_fork()?;
		let state = Arc::clone(&self.state);
		self.spawn_task::<(), _>(id, async move {
			run_capturing_masked(&state, action).await;
		})
	}

	/// As [`Self::spawn_weak_with_handle`], with the masking of
	/// [`Self::spawn_with_unmask`].
	pub fn spawn_weak_with_handle_with_unmask<T, F, Fut>(
		&self,
		action: F,
	) -> Result<CaptureHandle<T, E>, Error<E>>
	where
		T: Send + Clone + 'static,
		F: FnOnce(Unmask<'_, E>) -> Fut + Send + 'static,
		Fut: Future<Output = Result<T, E>> + Send,
		E: Clone,
	{
		let id = self.begin_fork()?;
		let cell = handle::new_cell();
		let state = Arc::clone(&self.state);
		let cell_for_task = Arc::clone(&cell);
		self.spawn_task::<(), _>(id, async move {
			let outcome = run_capturing_masked(&state, action).await;
			cell_for_task.set(outcome);
		})?;
		Ok(CaptureHandle::new(id, cell))
	}

	/// Blocks until every child forked so far has stopped running. Repeatable:
	/// children forked after a call to `wait` returns are not covered by a
	/// call already in flight, but a fresh call always reflects the current
	/// set. Mostly useful for the scope's own body to wait out a batch of
	/// capturing children without ending the scope.
	pub async fn wait(&self) {
		self.state.wait_quiescent().await;
	}

	/// As [`Self::wait`], but returns `false` if `duration` elapses first.
	pub async fn wait_for(&self, duration: Duration) -> bool {
		tokio::time::timeout(duration, self.wait()).await.is_ok()
	}
}

/// Runs a single child's body to completion, then deregisters it
/// unconditionally (spec.md §4.2 step 5) — including across a panic, so one
/// child panicking can never leave the scope permanently unable to reach
/// quiescence.
async fn run_child<E, T>(state: Arc<ScopeState<E>>, id: u64, body: impl Future<Output = T>)
where
	E: Send + Sync + 'static,
{
	let outcome = AssertUnwindSafe(body).catch_unwind().await;
	state.deregister(id).await;
	if let Err(payload) = outcome {
		std::panic::resume_unwind(payload);
	}
}

/// Opens a scope, runs `body`, and returns the scope's own body's result —
/// discarding the tagged detail of any failure. Most callers that only care
/// about success or the first failure's cause want this over
/// [`with_task_scope`]. Mirrors the corpus's `task_scope` free function.
pub async fn task_scope<T, E, Fut>(body: impl FnOnce(Scope<E>) -> Fut) -> Result<T, Error<E>>
where
	E: Send + Sync + Clone + 'static,
	Fut: Future<Output = Result<T, E>> + Send,
{
	with_task_scope(body).await.into_result().map_err(|raised| match raised {
		crate::error::Raised::Failed(e) => Error::Failed(e),
		crate::error::Raised::Interrupted => {
			unreachable!("a scope's own body is never interrupted by its own closure")
		},
	})
}

/// As [`task_scope`], but returns the scope's body's outcome tagged with
/// [`Outcome`] rather than collapsed into a plain `Result`. Mirrors the
/// corpus's `with_task_scope` free function.
///
/// Implements spec.md §6's priority order: the first failure recorded by a
/// propagating child always wins over the body's own result (only
/// propagating children ever write to the scope's shared failure slot — see
/// `child::run_capturing`). spec.md §7's kind 5 ("parent interrupted while
/// shutting children down") has no producer in this core, for the same
/// reason kind 2 doesn't: nothing here asynchronously interrupts the scope's
/// own body from outside (SPEC_FULL.md §0), so the body's own result is
/// exactly what is reported whenever no child ever raised.
pub async fn with_task_scope<T, E, Fut>(body: impl FnOnce(Scope<E>) -> Fut) -> Outcome<T, E>
where
	E: Send + Sync + Clone + 'static,
	Fut: Future<Output = Result<T, E>> + Send,
{
	let scope = Scope::new();
	let body_result = {
		let scope = scope.clone();
		tokio::select! {
			biased;
			() = scope.state.wait_for_failure() => None,
			result = body(scope) => Some(result),
		}
	};

	// spec.md §4.1 shutdown: close to admission, interrupt every live child by
	// letting them observe the close, then block until all have stopped.
	scope.state.close().await;
	scope.state.wait_quiescent().await;

	match scope.state.take_failure() {
		Some(e) => Outcome::Raised(crate::error::Raised::Failed(e)),
		None => match body_result {
			Some(Ok(value)) => Outcome::Value(value),
			Some(Err(e)) => Outcome::Raised(crate::error::Raised::Failed(e)),
			None => unreachable!(
				"wait_for_failure only resolves once a failure is recorded, \
				 which take_failure above would have observed"
			),
		},
	}
}
