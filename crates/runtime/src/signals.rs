//! Per-proxy signal subscription bookkeeping.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::proxy::ProxyObject;

/// Handler invoked with `(proxy, signal index, args)` when a subscribed
/// signal fires on the peer. Handlers are compared by `Arc` identity.
pub type SignalHandler = Arc<dyn Fn(&ProxyObject, usize, &[Value]) + Send + Sync>;

/// Signal index to ordered handler list.
///
/// A non-empty list means the peer has an active subscription for that
/// index; the registry reports the 0→1 and 1→0 transitions so the caller
/// knows when to send `signalConnect` and `signalDisconnect`.
#[derive(Default)]
pub(crate) struct SignalRegistry {
	handlers: BTreeMap<usize, Vec<SignalHandler>>,
}

impl SignalRegistry {
	/// Appends `handler`. Returns true if it is the first one for `index`.
	pub(crate) fn add(&mut self, index: usize, handler: SignalHandler) -> bool {
		let list = self.handlers.entry(index).or_default();
		list.push(handler);
		list.len() == 1
	}

	/// Removes the first registration of `handler`. Returns true if that
	/// emptied the list for `index`.
	pub(crate) fn remove(&mut self, index: usize, handler: &SignalHandler) -> bool {
		let Some(list) = self.handlers.get_mut(&index) else {
			return false;
		};
		let Some(pos) = list.iter().position(|h| Arc::ptr_eq(h, handler)) else {
			return false;
		};
		list.remove(pos);
		if list.is_empty() {
			self.handlers.remove(&index);
			true
		} else {
			false
		}
	}

	/// Rolls back an `add` whose subscription could not be sent.
	pub(crate) fn undo_add(&mut self, index: usize, handler: &SignalHandler) {
		self.remove(index, handler);
	}

	/// Snapshot of the handlers for `index` in registration order.
	pub(crate) fn handlers(&self, index: usize) -> Vec<SignalHandler> {
		self.handlers.get(&index).cloned().unwrap_or_default()
	}

	pub(crate) fn count(&self, index: usize) -> usize {
		self.handlers.get(&index).map_or(0, Vec::len)
	}

	pub(crate) fn clear(&mut self) {
		self.handlers.clear();
	}
}
