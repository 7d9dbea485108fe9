//! Correlation of outstanding invocations with their results.
//!
//! Every id is handed out once and removed from the table exactly once,
//! either by its `InvokeResponse` or by the disconnect of its transport.
//! Whoever removes the entry completes it; the table itself never completes
//! anything.

use std::collections::HashMap;

use serde_json::Value;

use crate::link::TransportId;
use crate::promise::Promise;

/// One invocation awaiting its response.
pub(crate) struct PendingInvocation {
	pub(crate) transport: TransportId,
	pub(crate) object: String,
	pub(crate) method: String,
	pub(crate) promise: Promise<Value>,
}

#[derive(Default)]
pub(crate) struct PendingTable {
	next_id: u64,
	entries: HashMap<u64, PendingInvocation>,
}

impl PendingTable {
	/// Stores `entry` under a fresh id.
	pub(crate) fn insert(&mut self, entry: PendingInvocation) -> u64 {
		let id = self.next_id;
		self.next_id += 1;
		self.entries.insert(id, entry);
		id
	}

	pub(crate) fn take(&mut self, id: u64) -> Option<PendingInvocation> {
		self.entries.remove(&id)
	}

	/// Removes `id` only if it was sent over `transport`.
	///
	/// A response arriving on another transport leaves the entry in place so
	/// its own transport can still answer or drain it.
	pub(crate) fn take_from(&mut self, id: u64, transport: TransportId) -> Option<PendingInvocation> {
		match self.entries.get(&id) {
			Some(entry) if entry.transport == transport => self.entries.remove(&id),
			_ => None,
		}
	}

	/// Removes every entry that belongs to `transport`, in id order.
	pub(crate) fn drain_transport(&mut self, transport: TransportId) -> Vec<(u64, PendingInvocation)> {
		let mut ids: Vec<u64> = self
			.entries
			.iter()
			.filter(|(_, entry)| entry.transport == transport)
			.map(|(id, _)| *id)
			.collect();
		ids.sort_unstable();
		ids.into_iter()
			.filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry)))
			.collect()
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(transport: u64) -> PendingInvocation {
		let (promise, _completion) = Promise::channel();
		PendingInvocation {
			transport: TransportId::new(transport),
			object: "counter".to_string(),
			method: "incX()".to_string(),
			promise,
		}
	}

	#[test]
	fn test_ids_are_monotonic() {
		let mut table = PendingTable::default();
		assert_eq!(table.insert(entry(0)), 0);
		assert_eq!(table.insert(entry(0)), 1);
		table.take(0);
		assert_eq!(table.insert(entry(0)), 2);
		assert_eq!(table.len(), 2);
	}

	#[test]
	fn test_take_removes_once() {
		let mut table = PendingTable::default();
		let id = table.insert(entry(0));
		assert!(table.take(id).is_some());
		assert!(table.take(id).is_none());
	}

	#[test]
	fn test_drain_transport_keeps_others() {
		let mut table = PendingTable::default();
		table.insert(entry(1));
		table.insert(entry(2));
		table.insert(entry(1));

		let drained = table.drain_transport(TransportId::new(1));
		let ids: Vec<u64> = drained.iter().map(|(id, _)| *id).collect();
		assert_eq!(ids, [0, 2]);
		assert_eq!(table.len(), 1);
		assert_eq!(table.drain_transport(TransportId::new(2)).len(), 1);
	}

	#[test]
	fn test_take_from_checks_transport() {
		let mut table = PendingTable::default();
		let id = table.insert(entry(4));
		assert!(table.take_from(id, TransportId::new(5)).is_none());
		assert_eq!(table.len(), 1);
		assert_eq!(table.take_from(id, TransportId::new(4)).unwrap().object, "counter");
		assert!(table.take_from(id, TransportId::new(4)).is_none());
	}
}
