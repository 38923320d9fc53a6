//! End-to-end scenarios, matching the request/response shape of the corpus's
//! own `task_scope` call sites (e.g. `engine/src/retrier.rs`'s test module).

use std::time::Duration;

use task_scope::{task_scope, with_task_scope, Error, Outcome, Raised};
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Boom(&'static str);

impl std::fmt::Display for Boom {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "boom: {}", self.0)
	}
}

/// A body that forks nothing and just returns: the trivial case, P1/P2 hold
/// vacuously.
#[tokio::test]
async fn empty_scope_returns_body_value() {
	let result: Result<u32, Error<Boom>> = task_scope(|_scope| async move { Ok(42) }).await;
	assert_eq!(result.unwrap(), 42);
}

/// A propagating child's own failure ends the scope even though the body
/// never returns on its own (spec.md §6).
#[tokio::test]
async fn propagating_child_failure_preempts_body() {
	let result: Result<(), Error<Boom>> = task_scope(|scope| async move {
		scope.spawn(async { Err(Boom("child")) }).unwrap();
		std::future::pending::<()>().await;
		#[allow(unreachable_code)]
		Ok(())
	})
	.await;

	match result {
		Err(Error::Failed(Boom("child"))) => {},
		other => panic!("expected child failure to propagate, got {other:?}"),
	}
}

/// A value-returning propagating child, joined through its handle before the
/// scope ends.
#[tokio::test]
async fn spawn_with_handle_joins_child_value() {
	let result: Result<u32, Error<Boom>> = task_scope(|scope| async move {
		let handle = scope.spawn_with_handle(async { Ok::<_, Boom>(7) }).unwrap();
		let value = handle.join().await.map_err(|raised| match raised {
			Raised::Failed(e) => e,
			Raised::Interrupted => unreachable!(),
		})?;
		Ok(value * 6)
	})
	.await;
	assert_eq!(result.unwrap(), 42);
}

/// Once the body returns, every still-running capturing child is interrupted
/// and the scope does not return control until they have all stopped — P1.
#[tokio::test(start_paused = true)]
async fn scope_waits_for_capturing_children_to_be_interrupted() {
	let (stopped_tx, stopped_rx) = oneshot::channel();

	let result: Result<(), Error<Boom>> = task_scope(|scope| async move {
		scope
			.spawn_weak_with_unmask(move |unmask| async move {
				let outcome = unmask.unmask(std::future::pending::<()>()).await;
				assert!(outcome.is_err(), "child should observe the interrupt, not run forever");
				let _ = stopped_tx.send(());
				Ok(())
			})
			.unwrap();
		Ok(())
	})
	.await;

	result.unwrap();
	// If the scope returned before the child deregistered, this would hang
	// forever and the `#[tokio::test]` would time out.
	stopped_rx.await.unwrap();
}

/// A child that never calls `unmask` is never interrupted early; the scope
/// blocks on it for as long as it keeps running (spec.md §8 "ignoring the
/// interrupt blocks the parent forever" — bounded here by an outer timeout
/// so the test itself terminates).
#[tokio::test(start_paused = true)]
async fn ignoring_unmask_blocks_shutdown_until_the_child_finishes() {
	let fut = task_scope(|scope: task_scope::Scope<Boom>| async move {
		scope
			.spawn_weak_with_unmask(|_unmask| async move {
				tokio::time::sleep(Duration::from_secs(10)).await;
				Ok(())
			})
			.unwrap();
		Ok::<(), Boom>(())
	});

	let outcome = tokio::time::timeout(Duration::from_secs(1), fut).await;
	assert!(outcome.is_err(), "scope must not return before the unmasked-ignoring child finishes");
}

/// Forking after the scope has started shutting down fails synchronously
/// with `Error::ScopeClosed` (spec.md §7 kind 4) instead of silently
/// spawning an orphaned task.
#[tokio::test(start_paused = true)]
async fn forking_onto_a_closing_scope_is_rejected() {
	let result: Result<(), Error<Boom>> = task_scope(|scope| async move {
		let inner = scope.clone();
		scope
			.spawn_weak_with_unmask(move |unmask| async move {
				// Wait for our own scope to start closing, then attempt a
				// fork onto it from inside one of its own children.
				let _ = unmask.unmask(std::future::pending::<()>()).await;
				assert!(matches!(inner.spawn_weak(async { Ok(()) }), Err(Error::ScopeClosed)));
				Ok(())
			})
			.unwrap();
		Ok(())
	})
	.await;
	result.unwrap();
}

/// `with_task_scope` reports the scope body's own failure when no child ever
/// raises one.
#[tokio::test]
async fn with_task_scope_surfaces_body_failure_alone() {
	let outcome: Outcome<(), Boom> = with_task_scope(|_scope| async move { Err(Boom("body")) }).await;
	match outcome {
		Outcome::Raised(Raised::Failed(Boom("body"))) => {},
		other => panic!("expected body failure, got {other:?}"),
	}
}

/// A capturing child that observes the interrupt, then fails for reasons of
/// its own during its post-interrupt cleanup, never preempts the scope's own
/// result — `async*` variants only ever propagate a third-party interrupt,
/// which this core never produces (spec.md §7). Its own handle still
/// reports the real failure.
#[tokio::test(start_paused = true)]
async fn capturing_child_failure_during_shutdown_is_captured_only() {
	// The body returns immediately with the handle in hand; the child below
	// keeps running until the scope actually closes behind it.
	let outcome: Outcome<task_scope::CaptureHandle<(), Boom>, Boom> = with_task_scope(|scope| async move {
		let handle = scope
			.spawn_weak_with_handle_with_unmask(|unmask| async move {
				let _ = unmask.unmask(std::future::pending::<()>()).await;
				// Past this point the scope is already closing; this
				// failure has nothing to do with the interrupt itself.
				Err(Boom("cleanup failed"))
			})
			.unwrap();
		Ok(handle)
	})
	.await;

	let handle = match outcome {
		Outcome::Value(handle) => handle,
		other => panic!("capturing failure must not preempt the body's own result, got {other:?}"),
	};
	match handle.join().await {
		Outcome::Raised(Raised::Failed(Boom("cleanup failed"))) => {},
		other => panic!("expected the child's own cleanup failure, got {other:?}"),
	}
}

/// A handle obtained from a capturing fork always returns the full tagged
/// outcome, including `Interrupted`, once the scope has closed.
#[tokio::test(start_paused = true)]
async fn capture_handle_reports_interruption() {
	let result: Result<Outcome<(), Boom>, Error<Boom>> = task_scope(|scope| async move {
		let handle = scope
			.spawn_weak_with_handle(async {
				std::future::pending::<()>().await;
				#[allow(unreachable_code)]
				Ok(())
			})
			.unwrap();
		// The body returns immediately; the child above is still running and
		// will be interrupted during shutdown.
		Ok(handle)
	})
	.await;

	let handle = result.unwrap();
	match handle.join().await {
		Outcome::Raised(Raised::Interrupted) => {},
		other => panic!("expected Interrupted, got {other:?}"),
	}
}

/// `join_for` times out without blocking forever when the child outlives the
/// deadline but not the scope.
#[tokio::test(start_paused = true)]
async fn join_for_times_out() {
	task_scope(|scope: task_scope::Scope<Boom>| async move {
		let handle = scope.spawn_with_handle(async {
			tokio::time::sleep(Duration::from_secs(5)).await;
			Ok::<_, Boom>(())
		})?;
		assert!(handle.join_for(Duration::from_millis(10)).await.is_none());
		Ok(())
	})
	.await
	.unwrap();
}
