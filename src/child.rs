//! How a child's action actually runs: the propagating/capturing distinction
//! and the masked/unmasked distinction from spec.md §4.3, realized as a race
//! against the scope's `closing` signal (see SPEC_FULL.md §0).

use std::future::Future;

use crate::{
	error::{Outcome, Raised},
	state::ScopeState,
};

/// Witness that an [`Unmask::unmask`]'d future lost its race against the
/// scope closing. Returned instead of the future's own output; never
/// constructed by user code.
#[derive(Debug, Clone, Copy)]
pub struct Interrupted;

/// Passed to the action of a `*_with_unmask` fork variant. Everywhere else,
/// a child's action runs fully masked: the scope's interrupt is only ever
/// observed at the points the child itself opts into with [`Self::unmask`].
/// A child that never calls it can never be interrupted early, and blocks
/// its scope's shutdown for as long as it keeps running — spec.md §8's
/// "ignoring the interrupt blocks the parent forever" scenario.
pub struct Unmask<'a, E> {
	state: &'a ScopeState<E>,
}

impl<'a, E> Unmask<'a, E> {
	pub(crate) fn new(state: &'a ScopeState<E>) -> Self {
		Self { state }
	}

	/// Races `fut` against the scope closing. Returns `Err(Interrupted)` if
	/// the scope closed first; `fut` is dropped at that point, same as any
	/// other `select!` loser.
	pub async fn unmask<T>(&self, fut: impl Future<Output = T>) -> Result<T, Interrupted> {
		tokio::select! {
			biased;
			() = self.state.wait_for_closing() => Err(Interrupted),
			value = fut => Ok(value),
		}
	}
}

/// Races `fut` against the scope closing, for the default (non-`_with_unmask`)
/// variants, whose entire action is implicitly the unmasked region.
async fn race_with_closing<E, T>(state: &ScopeState<E>, fut: impl Future<Output = T>) -> Result<T, Interrupted> {
	tokio::select! {
		biased;
		() = state.wait_for_closing() => Err(Interrupted),
		value = fut => Ok(value),
	}
}

/// Runs the action of a propagating, unmasked fork (`spawn`, `spawn_with_handle`).
///
/// A failure propagates to the scope (spec.md §6); the scope-closure
/// interrupt is swallowed, since the scope is already shutting down by the
/// time it is observed and there is no one left to report it to.
pub(crate) async fn run_propagating<E, T, Fut>(state: &ScopeState<E>, action: Fut) -> Outcome<T, E>
where
	Fut: Future<Output = Result<T, E>>,
	E: Clone,
{
	match race_with_closing(state, action).await {
		Ok(Ok(value)) => Outcome::Value(value),
		Ok(Err(e)) => {
			state.propagate(e.clone());
			Outcome::Raised(Raised::Failed(e))
		},
		Err(Interrupted) => Outcome::Raised(Raised::Interrupted),
	}
}

/// Runs the action of a propagating, `_with_unmask` fork
/// (`spawn_with_unmask`, `spawn_with_handle_with_unmask`). The action decides
/// for itself, via [`Unmask::unmask`], which parts of its own execution are
/// interruptible; this wrapper only classifies the result.
pub(crate) async fn run_propagating_masked<E, T, Fut>(
	state: &ScopeState<E>,
	action: impl FnOnce(Unmask<'_, E>) -> Fut,
) -> Outcome<T, E>
where
	Fut: Future<Output = Result<T, E>>,
	E: Clone,
{
	match action(Unmask::new(state)).await {
		Ok(value) => Outcome::Value(value),
		Err(e) => {
			state.propagate(e.clone());
			Outcome::Raised(Raised::Failed(e))
		},
	}
}

/// Runs the action of a capturing, unmasked fork (`spawn_weak`,
/// `spawn_weak_with_handle`). Never propagates: spec.md §7 restricts
/// `async*` variants to propagating only kind 2 (asynchronous third-party
/// interruption), which this core has no producer for (SPEC_FULL.md §0). An
/// ordinary failure (kind 1) is always captured-only here, regardless of
/// whether the scope happens to be closing when it occurs.
pub(crate) async fn run_capturing<E, T, Fut>(state: &ScopeState<E>, action: Fut) -> Outcome<T, E>
where
	Fut: Future<Output = Result<T, E>>,
{
	match race_with_closing(state, action).await {
		Ok(Ok(value)) => Outcome::Value(value),
		Ok(Err(e)) => Outcome::Raised(Raised::Failed(e)),
		Err(Interrupted) => Outcome::Raised(Raised::Interrupted),
	}
}

/// Runs the action of a capturing, `_with_unmask` fork (`spawn_weak_with_unmask`,
/// `spawn_weak_with_handle_with_unmask`). As [`run_capturing`], never
/// propagates an ordinary failure.
pub(crate) async fn run_capturing_masked<E, T, Fut>(
	state: &ScopeState<E>,
	action: impl FnOnce(Unmask<'_, E>) -> Fut,
) -> Outcome<T, E>
where
	Fut: Future<Output = Result<T, E>>,
{
	match action(Unmask::new(state)).await {
		Ok(value) => Outcome::Value(value),
		Err(e) => Outcome::Raised(Raised::Failed(e)),
	}
}
