//! The outcome of a child's action, and the errors surfaced at the scope
//! boundary.

use std::fmt;

/// What a child's action produced: a value, or one of the reasons in
/// [`Raised`] it didn't.
///
/// This is what a capturing (`spawn_weak*`) handle's `join` always returns,
/// and what a propagating (`spawn*`) handle's `join` unwraps before
/// re-raising.
#[derive(Debug, Clone)]
pub enum Outcome<T, E> {
	/// The action completed normally.
	Value(T),
	/// The action did not complete normally; see [`Raised`].
	Raised(Raised<E>),
}

impl<T, E> Outcome<T, E> {
	pub(crate) fn into_result(self) -> Result<T, Raised<E>> {
		match self {
			Outcome::Value(v) => Ok(v),
			Outcome::Raised(e) => Err(e),
		}
	}
}

/// Why a child's action did not produce a value.
///
/// The original design (spec.md §7) distinguishes four ways a child can fail
/// to produce a value; this core only ever constructs two of them, because
/// it does not implement general third-party task interruption (that
/// primitive is host-assumed, see SPEC_FULL.md §0) — a child's action can
/// only ever be interrupted by its own scope closing.
#[derive(Debug, Clone)]
pub enum Raised<E> {
	/// The action itself returned `Err(e)`.
	Failed(E),
	/// The scope this child belongs to is shutting down and delivered its
	/// distinguished interrupt. Never constructed by user code. A
	/// propagating handle never yields this variant: it is only ever
	/// swallowed (the scope is always closed by the time it is observed,
	/// see `child::race_with_closing`) or surfaced through a capturing
	/// handle.
	Interrupted,
}

impl<E: fmt::Display> fmt::Display for Raised<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Raised::Failed(e) => write!(f, "{e}"),
			Raised::Interrupted => write!(f, "interrupted by scope closure"),
		}
	}
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Raised<E> {}

/// Errors surfaced at the crate's public boundary: either from a `spawn*`
/// call itself, or from [`crate::task_scope`] once the scope has fully shut
/// down.
#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
	/// spec.md §7 kind 4: a `spawn*` method was called on a scope that has
	/// already begun shutting down. Synchronous in the caller; no task is
	/// spawned, and no scope state is left partially updated.
	#[error("scope closed: cannot fork a new child onto a scope that is shutting down")]
	ScopeClosed,
	/// The unwrapped failure of a propagating child, or, if none occurred,
	/// the scope's own body. See [`crate::task_scope`] for the priority
	/// order applied when both occur.
	#[error("{0}")]
	Failed(E),
}
