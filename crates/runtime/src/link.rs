//! Per-transport link state and the inbound delivery handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use hybridge_protocol::Message;

use crate::channel::Shared;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Index of a connected transport within its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

impl TransportId {
	pub(crate) fn new(raw: u64) -> Self {
		Self(raw)
	}

	pub fn as_u64(self) -> u64 {
		self.0
	}
}

impl fmt::Display for TransportId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "transport#{}", self.0)
	}
}

/// Lifecycle of one connected transport.
///
/// `Closed` is terminal. A link never returns to `Handshaking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
	/// Local `init` sent, peer `init` not yet received.
	Handshaking,
	/// Peer `init` received; proxies are available.
	Established,
	/// Disconnected; every send fails with [`Error::ConnectionClosed`].
	Closed,
}

/// Sending half of a connection, shared by the channel and its proxies.
pub(crate) struct Link {
	id: TransportId,
	transport: Arc<dyn Transport>,
	closed: AtomicBool,
}

impl Link {
	pub(crate) fn new(id: TransportId, transport: Arc<dyn Transport>) -> Self {
		Self {
			id,
			transport,
			closed: AtomicBool::new(false),
		}
	}

	pub(crate) fn id(&self) -> TransportId {
		self.id
	}

	pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
		&self.transport
	}

	/// Hands `message` to the transport unless the link is closed.
	pub(crate) fn send(&self, message: Message) -> Result<()> {
		if self.is_closed() {
			return Err(Error::ConnectionClosed);
		}
		tracing::debug!(transport = %self.id, kind = message.kind(), "Sending message");
		self.transport.send(message)
	}

	/// Marks the link closed. Returns false if it already was.
	pub(crate) fn close(&self) -> bool {
		!self.closed.swap(true, Ordering::SeqCst)
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Returns true if this link carries `transport`.
	pub(crate) fn carries<T: ?Sized>(&self, transport: &Arc<T>) -> bool {
		same_object(&self.transport, transport)
	}
}

/// Pointer identity across differently typed `Arc`s of the same allocation.
pub(crate) fn same_object<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
	std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Handle a transport uses to feed received messages into its channel.
///
/// Holds only a weak reference: once the channel is gone, deliveries are
/// dropped.
#[derive(Clone)]
pub struct Inbound {
	channel: Weak<Shared>,
	transport: TransportId,
}

impl Inbound {
	pub(crate) fn new(channel: Weak<Shared>, transport: TransportId) -> Self {
		Self { channel, transport }
	}

	pub fn transport_id(&self) -> TransportId {
		self.transport
	}

	/// Returns true while the channel still exists and holds this transport.
	pub fn is_connected(&self) -> bool {
		self.channel
			.upgrade()
			.is_some_and(|shared| shared.has_transport(self.transport))
	}

	/// Dispatches one received message on the calling thread.
	pub fn deliver(&self, message: Message) {
		match self.channel.upgrade() {
			Some(shared) => shared.deliver(self.transport, message),
			None => tracing::debug!(
				transport = %self.transport,
				kind = message.kind(),
				"Channel gone, dropping message"
			),
		}
	}

	/// Decodes a JSON text message and dispatches it.
	///
	/// Malformed text is logged and dropped; the error is returned so text
	/// carriers can decide whether to keep reading.
	pub fn deliver_text(&self, text: &str) -> Result<()> {
		match hybridge_protocol::decode(text) {
			Ok(message) => {
				self.deliver(message);
				Ok(())
			}
			Err(e) => {
				tracing::error!(transport = %self.transport, "Failed to parse message: {}", e);
				Err(Error::Json(e))
			}
		}
	}
}

impl fmt::Debug for Inbound {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Inbound")
			.field("transport", &self.transport)
			.finish_non_exhaustive()
	}
}
