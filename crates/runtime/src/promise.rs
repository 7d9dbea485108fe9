//! One-shot result slots shared by invocations and handshakes.
//!
//! A [`Promise`] is completed exactly once; `complete` consumes it, so a
//! second completion cannot be expressed. The reading side is either a
//! [`Completion`] future or a callback, chosen when the promise is created.
//! Normal results and forced failures (disconnect) take the same path.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send>;

/// Write side of a single-completion result slot.
pub(crate) enum Promise<T> {
	Channel(oneshot::Sender<Result<T>>),
	Callback(Callback<T>),
}

impl<T: Send + 'static> Promise<T> {
	/// Creates a promise read through a [`Completion`] future.
	pub(crate) fn channel() -> (Self, Completion<T>) {
		let (tx, rx) = oneshot::channel();
		(Promise::Channel(tx), Completion { rx })
	}

	/// Creates a promise that runs `f` on completion.
	pub(crate) fn callback<F>(f: F) -> Self
	where
		F: FnOnce(Result<T>) + Send + 'static,
	{
		Promise::Callback(Box::new(f))
	}

	/// Completes the promise, running the callback on the current thread.
	pub(crate) fn complete(self, result: Result<T>) {
		match self {
			Promise::Channel(tx) => {
				if tx.send(result).is_err() {
					tracing::trace!("Completion dropped before result arrived");
				}
			}
			Promise::Callback(f) => f(result),
		}
	}
}

/// Future resolving to the result of a [`Promise`].
///
/// Resolves to [`Error::ConnectionClosed`] if the promise is dropped without
/// being completed, which happens only when the owning channel is torn down.
#[must_use = "a Completion does nothing unless awaited or waited on"]
pub struct Completion<T> {
	rx: oneshot::Receiver<Result<T>>,
}

impl<T> Completion<T> {
	/// Blocks the current thread until the result arrives.
	///
	/// Must not be called from within an async runtime worker.
	pub fn wait(self) -> Result<T> {
		self.rx.blocking_recv().map_err(|_| Error::ConnectionClosed)?
	}

	/// Returns the result if it has already arrived.
	pub fn try_take(&mut self) -> Option<Result<T>> {
		match self.rx.try_recv() {
			Ok(result) => Some(result),
			Err(oneshot::error::TryRecvError::Empty) => None,
			Err(oneshot::error::TryRecvError::Closed) => Some(Err(Error::ConnectionClosed)),
		}
	}
}

impl<T> Future for Completion<T> {
	type Output = Result<T>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				Poll::Ready(result.map_err(|_| Error::ConnectionClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Result of a remote method invocation.
pub type PendingCall = Completion<Value>;

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test]
	async fn test_channel_promise_resolves() {
		let (promise, completion) = Promise::<Value>::channel();
		promise.complete(Ok(serde_json::json!(3)));
		assert_eq!(completion.await.unwrap(), serde_json::json!(3));
	}

	#[tokio::test]
	async fn test_dropped_promise_reports_closed() {
		let (promise, completion) = Promise::<Value>::channel();
		drop(promise);
		assert!(completion.await.unwrap_err().is_connection_closed());
	}

	#[test]
	fn test_callback_promise_runs_once() {
		let calls = Arc::new(AtomicUsize::new(0));
		let seen = Arc::clone(&calls);
		let promise = Promise::<Value>::callback(move |result| {
			assert!(result.unwrap_err().is_connection_closed());
			seen.fetch_add(1, Ordering::SeqCst);
		});
		promise.complete(Err(Error::ConnectionClosed));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_try_take() {
		let (promise, mut completion) = Promise::<u32>::channel();
		assert!(completion.try_take().is_none());
		promise.complete(Ok(9));
		assert_eq!(completion.try_take().unwrap().unwrap(), 9);
	}

	#[test]
	fn test_wait_blocks_until_completed() {
		let (promise, completion) = Promise::<u32>::channel();
		let worker = std::thread::spawn(move || promise.complete(Ok(5)));
		assert_eq!(completion.wait().unwrap(), 5);
		worker.join().unwrap();
	}
}
