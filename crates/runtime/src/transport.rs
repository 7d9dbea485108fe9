//! Message carriers between two channels.
//!
//! A [`Transport`] moves whole [`Message`] values to exactly one peer. It has
//! no protocol knowledge: the channel decides what to send, and received
//! messages are pushed back through the [`Inbound`] handle passed to
//! [`Transport::attach`].
//!
//! [`MemoryTransport`] connects two channels in the same process. It encodes
//! every message as JSON text so the wire format is exercised end to end.

use std::fmt;

use hybridge_protocol::Message;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::link::Inbound;

/// Point-to-point message carrier.
///
/// # Re-entrancy
///
/// `send` is called while the channel is in the middle of an operation and
/// must not deliver anything back into a channel on the calling stack. Queue
/// the message and deliver it from another task or thread.
pub trait Transport: Send + Sync + 'static {
	/// Queues `message` for the peer. Fire-and-forget.
	fn send(&self, message: Message) -> Result<()>;

	/// Called once when a channel adopts this transport. Every message
	/// received afterwards is passed to `inbound`.
	fn attach(&self, inbound: Inbound) -> Result<()>;

	/// Called when the channel disconnects from this transport.
	fn detach(&self) {}
}

/// One end of an in-process transport pair.
pub struct MemoryTransport {
	outbox: mpsc::UnboundedSender<String>,
	inbox: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
	pump: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryTransport {
	/// Creates two connected ends.
	pub fn pair() -> (Self, Self) {
		let (a_tx, a_rx) = mpsc::unbounded_channel();
		let (b_tx, b_rx) = mpsc::unbounded_channel();
		(Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
	}

	fn new(outbox: mpsc::UnboundedSender<String>, inbox: mpsc::UnboundedReceiver<String>) -> Self {
		Self {
			outbox,
			inbox: Mutex::new(Some(inbox)),
			pump: Mutex::new(None),
		}
	}
}

impl Transport for MemoryTransport {
	fn send(&self, message: Message) -> Result<()> {
		let text = hybridge_protocol::encode(&message)?;
		self.outbox
			.send(text)
			.map_err(|_| Error::TransportError("peer end dropped".to_string()))
	}

	fn attach(&self, inbound: Inbound) -> Result<()> {
		let mut rx = self
			.inbox
			.lock()
			.take()
			.ok_or_else(|| Error::TransportError("memory transport already attached".to_string()))?;
		let handle = Handle::try_current()
			.map_err(|e| Error::TransportError(format!("no tokio runtime: {e}")))?;

		let transport = inbound.transport_id();
		let task = handle.spawn(async move {
			while let Some(text) = rx.recv().await {
				// Parse failures are logged by deliver_text.
				let _ = inbound.deliver_text(&text);
			}
			tracing::debug!(%transport, "Memory transport peer closed");
		});
		*self.pump.lock() = Some(task);
		Ok(())
	}

	fn detach(&self) {
		if let Some(task) = self.pump.lock().take() {
			task.abort();
		}
	}
}

impl Drop for MemoryTransport {
	fn drop(&mut self) {
		if let Some(task) = self.pump.get_mut().take() {
			task.abort();
		}
	}
}

impl fmt::Debug for MemoryTransport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryTransport")
			.field("attached", &self.pump.lock().is_some())
			.finish()
	}
}
