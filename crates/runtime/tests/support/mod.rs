//! Shared fixtures for runtime integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use hybridge_protocol::{Init, Message, ObjectDescriptor, PropertyDescriptor};
use hybridge_runtime::{
	ClassInfo, Error, Inbound, MethodSignature, Object, Result, Timer, TimerTick, Transport,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

/// Installs a test log subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

/// Transport that records outgoing messages and lets the test play the peer.
#[derive(Default)]
pub struct RecordingTransport {
	sent: Mutex<Vec<Message>>,
	inbound: Mutex<Option<Inbound>>,
	failing: AtomicBool,
	detached: AtomicBool,
}

impl RecordingTransport {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn sent(&self) -> Vec<Message> {
		self.sent.lock().clone()
	}

	pub fn take_sent(&self) -> Vec<Message> {
		std::mem::take(&mut *self.sent.lock())
	}

	pub fn kinds(&self) -> Vec<&'static str> {
		self.sent.lock().iter().map(Message::kind).collect()
	}

	pub fn last(&self) -> Option<Message> {
		self.sent.lock().last().cloned()
	}

	/// Plays a message from the peer.
	pub fn deliver(&self, message: Message) {
		let inbound = self.inbound.lock().clone();
		inbound.expect("transport not attached").deliver(message);
	}

	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}

	pub fn was_detached(&self) -> bool {
		self.detached.load(Ordering::SeqCst)
	}
}

impl Transport for RecordingTransport {
	fn send(&self, message: Message) -> Result<()> {
		if self.failing.load(Ordering::SeqCst) {
			return Err(Error::TransportError("send failed".to_string()));
		}
		self.sent.lock().push(message);
		Ok(())
	}

	fn attach(&self, inbound: Inbound) -> Result<()> {
		*self.inbound.lock() = Some(inbound);
		Ok(())
	}

	fn detach(&self) {
		self.detached.store(true, Ordering::SeqCst);
	}
}

/// Counter with a writable `x`, a read-only `label`, `incX()`, `add(int)`
/// and one signal.
pub struct Counter {
	x: Mutex<i64>,
	label: String,
}

impl Counter {
	pub fn new(label: &str) -> Arc<Self> {
		Arc::new(Self {
			x: Mutex::new(0),
			label: label.to_string(),
		})
	}

	pub fn x(&self) -> i64 {
		*self.x.lock()
	}

	pub fn set_x(&self, value: i64) {
		*self.x.lock() = value;
	}
}

impl Object for Counter {
	fn class_info(&self) -> ClassInfo {
		ClassInfo::new()
			.property("x")
			.readonly_property("label")
			.method("incX()")
			.method("add(int)")
			.signals(1)
	}

	fn property(&self, name: &str) -> Option<Value> {
		match name {
			"x" => Some(json!(self.x())),
			"label" => Some(json!(self.label)),
			_ => None,
		}
	}

	fn set_property(&self, name: &str, value: Value) -> Result<()> {
		match (name, value.as_i64()) {
			("x", Some(v)) => {
				self.set_x(v);
				Ok(())
			}
			_ => Err(Error::InvalidArgument(format!("bad value for {name}: {value}"))),
		}
	}

	fn invoke(&self, method: &MethodSignature, args: Vec<Value>) -> Result<Value> {
		let mut x = self.x.lock();
		match method.name() {
			"incX" => {
				let old = *x;
				*x += 1;
				Ok(json!(old))
			}
			"add" => {
				let n = args[0]
					.as_i64()
					.ok_or_else(|| Error::MethodFailed("add expects an integer".to_string()))?;
				*x += n;
				Ok(json!(*x))
			}
			_ => Err(Error::MethodFailed(format!("{method} not handled"))),
		}
	}
}

/// Timer that only counts calls. A failing timer still counts the attempt.
#[derive(Default)]
pub struct CountingTimer {
	pub starts: AtomicUsize,
	pub stops: AtomicUsize,
	failing: AtomicBool,
	tick: Mutex<Option<TimerTick>>,
}

impl CountingTimer {
	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}

	pub fn starts(&self) -> usize {
		self.starts.load(Ordering::SeqCst)
	}

	pub fn stops(&self) -> usize {
		self.stops.load(Ordering::SeqCst)
	}

	/// Fires the tick captured by the last `start`.
	pub fn fire(&self) -> bool {
		let tick = self.tick.lock().clone();
		tick.is_some_and(|t| t.fire())
	}
}

impl Timer for CountingTimer {
	fn start(&self, _interval: Duration, tick: TimerTick) -> Result<()> {
		self.starts.fetch_add(1, Ordering::SeqCst);
		if self.failing.load(Ordering::SeqCst) {
			return Err(Error::Timer("start refused".to_string()));
		}
		*self.tick.lock() = Some(tick);
		Ok(())
	}

	fn stop(&self) {
		self.stops.fetch_add(1, Ordering::SeqCst);
	}
}

/// `init` a peer would send advertising one counter-like object.
pub fn peer_init(name: &str, x: i64) -> Message {
	let mut properties = BTreeMap::new();
	properties.insert("x".to_string(), PropertyDescriptor::new(json!(x)));
	properties.insert("label".to_string(), PropertyDescriptor::readonly(json!("remote")));

	let mut objects = BTreeMap::new();
	objects.insert(
		name.to_string(),
		ObjectDescriptor {
			properties,
			methods: vec!["incX()".to_string(), "add(int)".to_string()],
			signal_count: 1,
		},
	);
	Message::Init(Init {
		channel: "peer-channel".to_string(),
		objects,
	})
}

/// Polls `condition` until it holds, failing after ten seconds.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> anyhow::Result<()> {
	tokio::time::timeout(Duration::from_secs(10), async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.map_err(|_| anyhow::anyhow!("condition not met within 10s"))
}
