//! Local stand-ins for objects registered on a peer channel.
//!
//! A [`ProxyObject`] is created when the peer's `init` advertises an object.
//! It caches the advertised descriptor, keeps property values fresh from
//! `propertyUpdate` pushes, and routes writes, calls and signal
//! subscriptions back over the transport it came from.
//!
//! # Invocation
//!
//! ```ignore
//! let proxies = channel.connect_to(transport)?.await?;
//! let counter = &proxies["counter"];
//! let old = counter.invoke_method("incX()", vec![])?.await?;
//! ```
//!
//! Validation failures (unknown signature, wrong argument count) are
//! returned immediately and no completion ever fires. Everything after the
//! request is sent, including a disconnect, arrives through the returned
//! [`PendingCall`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use hybridge_protocol::{
	Message, MethodSignature, ObjectDescriptor, SetProperty, SignalSubscription,
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::channel::Shared;
use crate::error::{Error, Result};
use crate::link::{Link, TransportId};
use crate::promise::{PendingCall, Promise};
use crate::signals::{SignalHandler, SignalRegistry};

/// Name to proxy, as resolved by a handshake.
pub type ProxyMap = BTreeMap<String, Arc<ProxyObject>>;

/// Remote-side representation of one peer object.
pub struct ProxyObject {
	name: String,
	peer: String,
	link: Arc<Link>,
	channel: Weak<Shared>,
	descriptor: Mutex<ObjectDescriptor>,
	signals: Mutex<SignalRegistry>,
	valid: AtomicBool,
}

impl ProxyObject {
	pub(crate) fn new(
		name: String,
		peer: String,
		link: Arc<Link>,
		channel: Weak<Shared>,
		descriptor: ObjectDescriptor,
	) -> Self {
		Self {
			name,
			peer,
			link,
			channel,
			descriptor: Mutex::new(descriptor),
			signals: Mutex::new(SignalRegistry::default()),
			valid: AtomicBool::new(true),
		}
	}

	/// Name the peer registered the object under.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Identifier of the peer channel.
	pub fn peer_channel(&self) -> &str {
		&self.peer
	}

	pub fn transport_id(&self) -> TransportId {
		self.link.id()
	}

	/// False once the transport this proxy came from has disconnected.
	pub fn is_valid(&self) -> bool {
		self.valid.load(Ordering::SeqCst)
	}

	/// Copy of the cached descriptor.
	pub fn descriptor(&self) -> ObjectDescriptor {
		self.descriptor.lock().clone()
	}

	/// Cached property value.
	pub fn read_property(&self, name: &str) -> Result<Value> {
		self.descriptor
			.lock()
			.property(name)
			.map(|p| p.value.clone())
			.ok_or_else(|| self.unknown_property(name))
	}

	/// Asks the peer to write a property.
	///
	/// Returns once the request is handed to the transport. The cached value
	/// changes only when the peer pushes the new value back.
	pub fn write_property(&self, name: &str, value: Value) -> Result<()> {
		let readonly = self
			.descriptor
			.lock()
			.property(name)
			.map(|p| p.readonly)
			.ok_or_else(|| self.unknown_property(name))?;
		if readonly {
			return Err(Error::ReadOnlyProperty {
				object: self.name.clone(),
				property: name.to_string(),
			});
		}

		self.link.send(Message::SetProperty(SetProperty {
			object: self.name.clone(),
			property: name.to_string(),
			value,
		}))
	}

	/// Invokes a method on the peer object.
	pub fn invoke_method(&self, signature: &str, args: Vec<Value>) -> Result<PendingCall> {
		let signature = self.resolve(signature, args.len())?;
		let (promise, completion) = Promise::channel();
		self.dispatch_call(&signature, args, promise);
		Ok(completion)
	}

	/// Invokes a method on the peer object and hands the result to `callback`.
	///
	/// The callback runs exactly once, on the thread that delivers the
	/// response or performs the disconnect.
	pub fn invoke_method_with<F>(&self, signature: &str, args: Vec<Value>, callback: F) -> Result<()>
	where
		F: FnOnce(Result<Value>) + Send + 'static,
	{
		let signature = self.resolve(signature, args.len())?;
		self.dispatch_call(&signature, args, Promise::callback(callback));
		Ok(())
	}

	/// Stub bound to one advertised method, if present.
	pub fn method(self: &Arc<Self>, signature: &str) -> Option<MethodStub> {
		let signature: MethodSignature = signature.parse().ok()?;
		if !self.descriptor.lock().has_method(&signature.to_string()) {
			return None;
		}
		Some(MethodStub {
			proxy: Arc::clone(self),
			signature,
		})
	}

	/// Stubs for every advertised method.
	pub fn methods(self: &Arc<Self>) -> Vec<MethodStub> {
		let methods = self.descriptor.lock().methods.clone();
		methods
			.iter()
			.filter_map(|m| m.parse().ok())
			.map(|signature| MethodStub {
				proxy: Arc::clone(self),
				signature,
			})
			.collect()
	}

	/// Subscribes `handler` to signal `index`.
	///
	/// The first handler for an index sends `signalConnect` to the peer.
	pub fn connect(&self, index: usize, handler: SignalHandler) -> Result<()> {
		if !self.descriptor.lock().has_signal(index) {
			return Err(Error::UnknownSignal {
				object: self.name.clone(),
				index,
			});
		}

		let mut signals = self.signals.lock();
		if signals.add(index, Arc::clone(&handler)) {
			if let Err(e) = self.link.send(self.subscription(index, true)) {
				signals.undo_add(index, &handler);
				return Err(e);
			}
		}
		Ok(())
	}

	/// Removes one registration of `handler` from signal `index`.
	///
	/// Removing the last handler sends `signalDisconnect`, unless the link is
	/// already closed. Removing an unknown handler succeeds without effect.
	pub fn disconnect(&self, index: usize, handler: &SignalHandler) -> Result<()> {
		let mut signals = self.signals.lock();
		if signals.remove(index, handler) && !self.link.is_closed() {
			self.link.send(self.subscription(index, false))?;
		}
		Ok(())
	}

	/// Number of handlers connected to signal `index`.
	pub fn subscriber_count(&self, index: usize) -> usize {
		self.signals.lock().count(index)
	}

	fn subscription(&self, index: usize, connect: bool) -> Message {
		let subscription = SignalSubscription {
			object: self.name.clone(),
			signal: index,
		};
		if connect {
			Message::SignalConnect(subscription)
		} else {
			Message::SignalDisconnect(subscription)
		}
	}

	fn resolve(&self, signature: &str, argc: usize) -> Result<MethodSignature> {
		let no_such_method = || Error::NoSuchMethod {
			object: self.name.clone(),
			signature: signature.to_string(),
		};
		let parsed: MethodSignature = signature.parse().map_err(|_| no_such_method())?;
		if !self.descriptor.lock().has_method(&parsed.to_string()) {
			return Err(no_such_method());
		}
		if parsed.arity() != argc {
			return Err(Error::InvalidArgument(format!(
				"{}.{} takes {} argument(s), got {}",
				self.name,
				parsed,
				parsed.arity(),
				argc
			)));
		}
		Ok(parsed)
	}

	fn dispatch_call(&self, signature: &MethodSignature, args: Vec<Value>, promise: Promise<Value>) {
		match self.channel.upgrade() {
			Some(shared) => shared.invoke(&self.link, &self.name, signature.to_string(), args, promise),
			None => promise.complete(Err(Error::ConnectionClosed)),
		}
	}

	fn unknown_property(&self, name: &str) -> Error {
		Error::UnknownProperty {
			object: self.name.clone(),
			property: name.to_string(),
		}
	}

	pub(crate) fn apply_update(&self, property: &str, value: Value) {
		let mut descriptor = self.descriptor.lock();
		match descriptor.properties.get_mut(property) {
			Some(slot) => slot.value = value,
			None => tracing::debug!(
				object = %self.name,
				property,
				"Update for unadvertised property (ignored)"
			),
		}
	}

	pub(crate) fn refresh(&self, descriptor: ObjectDescriptor) {
		*self.descriptor.lock() = descriptor;
		self.valid.store(true, Ordering::SeqCst);
	}

	/// Runs every handler of `index` in registration order.
	pub(crate) fn emit(&self, index: usize, args: &[Value]) {
		let handlers = self.signals.lock().handlers(index);
		if handlers.is_empty() {
			tracing::debug!(object = %self.name, index, "Signal with no handlers (ignored)");
		}
		for handler in handlers {
			handler(self, index, args);
		}
	}

	pub(crate) fn invalidate(&self) {
		self.valid.store(false, Ordering::SeqCst);
		self.signals.lock().clear();
	}
}

impl fmt::Debug for ProxyObject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProxyObject")
			.field("name", &self.name)
			.field("transport", &self.link.id())
			.field("valid", &self.is_valid())
			.finish_non_exhaustive()
	}
}

/// Callable handle for one advertised method of a proxy.
#[derive(Clone)]
pub struct MethodStub {
	proxy: Arc<ProxyObject>,
	signature: MethodSignature,
}

impl MethodStub {
	pub fn signature(&self) -> &MethodSignature {
		&self.signature
	}

	pub fn proxy(&self) -> &Arc<ProxyObject> {
		&self.proxy
	}

	/// Same as [`ProxyObject::invoke_method`] for this stub's signature.
	pub fn call(&self, args: Vec<Value>) -> Result<PendingCall> {
		self.proxy.invoke_method(&self.signature.to_string(), args)
	}

	pub fn call_with<F>(&self, args: Vec<Value>, callback: F) -> Result<()>
	where
		F: FnOnce(Result<Value>) + Send + 'static,
	{
		self.proxy
			.invoke_method_with(&self.signature.to_string(), args, callback)
	}
}

impl fmt::Debug for MethodStub {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MethodStub")
			.field("object", &self.proxy.name)
			.field("signature", &self.signature.to_string())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::Transport;
	use crate::link::Inbound;
	use hybridge_protocol::PropertyDescriptor;
	use serde_json::json;

	#[derive(Default)]
	struct Sink {
		sent: Mutex<Vec<Message>>,
	}

	impl Transport for Sink {
		fn send(&self, message: Message) -> Result<()> {
			self.sent.lock().push(message);
			Ok(())
		}

		fn attach(&self, _inbound: Inbound) -> Result<()> {
			Ok(())
		}
	}

	fn proxy() -> (Arc<ProxyObject>, Arc<Sink>) {
		let sink = Arc::new(Sink::default());
		let link = Arc::new(Link::new(TransportId::new(0), sink.clone()));
		let mut descriptor = ObjectDescriptor {
			methods: vec!["incX()".to_string(), "add(int,int)".to_string()],
			signal_count: 1,
			..Default::default()
		};
		descriptor
			.properties
			.insert("x".to_string(), PropertyDescriptor::new(json!(0)));
		descriptor
			.properties
			.insert("id".to_string(), PropertyDescriptor::readonly(json!("c1")));
		let proxy = ProxyObject::new(
			"counter".to_string(),
			"peer".to_string(),
			link,
			Weak::new(),
			descriptor,
		);
		(Arc::new(proxy), sink)
	}

	#[test]
	fn test_read_and_update_property() {
		let (proxy, _) = proxy();
		assert_eq!(proxy.read_property("x").unwrap(), json!(0));
		proxy.apply_update("x", json!(5));
		proxy.apply_update("nope", json!(1));
		assert_eq!(proxy.read_property("x").unwrap(), json!(5));
		assert!(matches!(
			proxy.read_property("nope"),
			Err(Error::UnknownProperty { .. })
		));
	}

	#[test]
	fn test_write_property_validation() {
		let (proxy, sink) = proxy();
		assert!(matches!(
			proxy.write_property("id", json!("c2")),
			Err(Error::ReadOnlyProperty { .. })
		));
		assert!(matches!(
			proxy.write_property("y", json!(1)),
			Err(Error::UnknownProperty { .. })
		));
		proxy.write_property("x", json!(3)).unwrap();

		let sent = sink.sent.lock();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].kind(), "setProperty");
		// Not acknowledged yet, cache unchanged.
		assert_eq!(proxy.read_property("x").unwrap(), json!(0));
	}

	#[test]
	fn test_invoke_validation_is_synchronous() {
		let (proxy, sink) = proxy();
		assert!(matches!(
			proxy.invoke_method("decX()", vec![]),
			Err(Error::NoSuchMethod { .. })
		));
		assert!(matches!(
			proxy.invoke_method("garbage", vec![]),
			Err(Error::NoSuchMethod { .. })
		));
		assert!(matches!(
			proxy.invoke_method("add(int, int)", vec![json!(1)]),
			Err(Error::InvalidArgument(_))
		));
		assert!(sink.sent.lock().is_empty());
	}

	#[test]
	fn test_invoke_without_channel_fails_through_promise() {
		let (proxy, _) = proxy();
		let call = proxy.invoke_method("incX()", vec![]).unwrap();
		assert!(call.wait().unwrap_err().is_connection_closed());
	}

	#[test]
	fn test_method_stubs() {
		let (proxy, _) = proxy();
		let names: Vec<String> = proxy
			.methods()
			.iter()
			.map(|m| m.signature().to_string())
			.collect();
		assert_eq!(names, ["incX()", "add(int,int)"]);
		assert!(proxy.method("add( int,int )").is_some());
		assert!(proxy.method("sub(int,int)").is_none());
	}

	#[test]
	fn test_connect_sends_on_first_handler_only() {
		let (proxy, sink) = proxy();
		let a: SignalHandler = Arc::new(|_, _, _| {});
		let b: SignalHandler = Arc::new(|_, _, _| {});

		proxy.connect(0, a.clone()).unwrap();
		proxy.connect(0, b.clone()).unwrap();
		proxy.disconnect(0, &a).unwrap();
		proxy.disconnect(0, &b).unwrap();
		proxy.disconnect(0, &b).unwrap();

		let kinds: Vec<&str> = sink.sent.lock().iter().map(Message::kind).collect();
		assert_eq!(kinds, ["signalConnect", "signalDisconnect"]);
		assert!(matches!(
			proxy.connect(1, a),
			Err(Error::UnknownSignal { index: 1, .. })
		));
	}

	#[test]
	fn test_emit_in_registration_order() {
		let (proxy, _) = proxy();
		let order = Arc::new(Mutex::new(Vec::new()));
		for tag in ["first", "second"] {
			let order = Arc::clone(&order);
			proxy
				.connect(
					0,
					Arc::new(move |p: &ProxyObject, index: usize, args: &[Value]| {
						assert_eq!(p.name(), "counter");
						assert_eq!(index, 0);
						order.lock().push((tag, args[0].clone()));
					}),
				)
				.unwrap();
		}

		proxy.emit(0, &[json!(7)]);
		assert_eq!(
			*order.lock(),
			[("first", json!(7)), ("second", json!(7))]
		);
	}

	#[test]
	fn test_closed_link() {
		let (proxy, sink) = proxy();
		let handler: SignalHandler = Arc::new(|_, _, _| {});
		proxy.connect(0, handler.clone()).unwrap();

		proxy.link.close();
		proxy.invalidate();
		assert!(!proxy.is_valid());
		assert_eq!(proxy.subscriber_count(0), 0);
		assert!(proxy.connect(0, handler.clone()).unwrap_err().is_connection_closed());
		assert_eq!(proxy.subscriber_count(0), 0);
		assert!(proxy.disconnect(0, &handler).is_ok());
		assert!(
			proxy
				.write_property("x", json!(1))
				.unwrap_err()
				.is_connection_closed()
		);
		assert_eq!(sink.sent.lock().len(), 1);
	}
}
