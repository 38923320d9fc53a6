//! Structured concurrency for tokio tasks.
//!
//! A [`Scope`] bounds the lifetime of every task forked through it. When the
//! scope's body returns, panics, or a propagating child fails, the scope
//! interrupts every live child and blocks until every one of them has
//! actually stopped and deregistered, before control returns to whoever
//! called [`task_scope`]. No child can outlive the scope that forked it.
//!
//! ```ignore
//! task_scope(|scope| async move {
//!     let greeting = scope.spawn_with_handle(async { Ok::<_, anyhow::Error>("hi") });
//!     scope.spawn(background_task(scope));
//!     println!("{}", greeting?.join().await?);
//!     Ok(())
//! }).await
//! ```
//!
//! See [`Scope`] for the fork variants and [`task_scope`]/[`with_task_scope`]
//! for how to open one.

mod child;
mod error;
mod handle;
mod scope;
mod state;

pub use child::{Interrupted, Unmask};
pub use error::{Error, Outcome, Raised};
pub use handle::{CaptureHandle, ScopedJoinHandle};
pub use scope::{task_scope, with_task_scope, Scope};
