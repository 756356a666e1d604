//! Bounded parallel fan-out.
//!
//! Every lab command that touches more than one device goes through
//! [`dispatch`]: one task per item, at most `limit` running at once, results
//! collected in completion order. A panicking unit is reported as
//! [`TaskPanic`] for its own item and never takes down the others.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error)]
#[error("task panicked: {message}")]
pub struct TaskPanic {
    pub message: String,
}

/// Result of one dispatched unit; `index` is its position in the input.
#[derive(Debug)]
pub struct Completed<R> {
    pub index: usize,
    pub result: Result<R, TaskPanic>,
}

/// Run `work` over `items` with at most `limit` units in flight.
///
/// The returned vector has exactly one entry per item, in completion order.
pub async fn dispatch<T, R, F, Fut>(items: Vec<T>, limit: usize, work: F) -> Vec<Completed<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let total = items.len();
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let work = Arc::new(work);
    let mut tasks = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let work = Arc::clone(&work);
        tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => AssertUnwindSafe(work(item))
                    .catch_unwind()
                    .await
                    .map_err(panic_message),
                Err(_) => Err(TaskPanic {
                    message: "dispatcher semaphore closed".to_string(),
                }),
            };
            Completed { index, result }
        });
    }

    let mut completed = Vec::with_capacity(total);
    let mut seen = vec![false; total];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(done) => {
                seen[done.index] = true;
                completed.push(done);
            }
            Err(e) => warn!(error = %e, "Dispatched task did not complete"),
        }
    }

    // Cancelled tasks still get an entry so callers can account for every item.
    for (index, _) in seen.iter().enumerate().filter(|(_, seen)| !**seen) {
        completed.push(Completed {
            index,
            result: Err(TaskPanic {
                message: "task was cancelled".to_string(),
            }),
        });
    }

    debug!(total, limit, "Dispatch complete");
    completed
}

/// Turn a caught panic payload into a [`TaskPanic`].
pub fn panic_message(payload: Box<dyn Any + Send>) -> TaskPanic {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    TaskPanic { message }
}
