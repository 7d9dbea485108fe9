//! Inbound message dispatch.
//!
//! Messages arrive through [`Inbound`](crate::Inbound) on the transport's
//! delivery thread. Until the peer's `init` arrives, everything else is
//! buffered and replayed in order afterwards. Failures are logged and the
//! message dropped; a request that cannot be served still gets a response.

use std::collections::VecDeque;
use std::sync::Arc;

use hybridge_protocol::{
	Init, InvokeRequest, InvokeResponse, Message, MethodSignature, PropertyUpdate, SetProperty,
	SignalEmit, SignalSubscription,
};
use serde_json::Value;

use crate::channel::{Phase, Shared};
use crate::error::{Error, Result};
use crate::link::TransportId;
use crate::object::RegisteredObject;
use crate::proxy::{ProxyMap, ProxyObject};

impl Shared {
	/// Entry point for every received message.
	pub(crate) fn deliver(&self, transport: TransportId, message: Message) {
		{
			let mut links = self.links.lock();
			let Some(entry) = links.get_mut(&transport) else {
				tracing::debug!(%transport, kind = message.kind(), "Message for unknown transport (ignored)");
				return;
			};
			if let Phase::Handshaking { buffered, .. } = &mut entry.phase {
				if !message.is_init() {
					if buffered.len() >= self.config().handshake_buffer_limit {
						tracing::warn!(
							%transport,
							kind = message.kind(),
							"Handshake buffer full, dropping message"
						);
					} else {
						tracing::debug!(%transport, kind = message.kind(), "Buffering message until peer init");
						buffered.push_back(message);
					}
					return;
				}
			}
		}

		if let Err(e) = self.dispatch(transport, message) {
			tracing::error!(%transport, "Error dispatching message: {}", e);
		}
	}

	fn dispatch(&self, transport: TransportId, message: Message) -> Result<()> {
		tracing::debug!(%transport, kind = message.kind(), "Dispatching message");
		match message {
			Message::Init(init) => self.handle_init(transport, init),
			Message::PropertyUpdate(update) => {
				self.apply_updates(transport, vec![update]);
				Ok(())
			}
			Message::PropertyBatchUpdate(batch) => {
				self.apply_updates(transport, batch.updates);
				Ok(())
			}
			Message::SetProperty(set) => self.handle_set_property(set),
			Message::InvokeRequest(request) => self.handle_invoke_request(transport, request),
			Message::InvokeResponse(response) => self.handle_invoke_response(transport, response),
			Message::SignalConnect(subscription) => {
				self.handle_subscription(transport, subscription, true)
			}
			Message::SignalDisconnect(subscription) => {
				self.handle_subscription(transport, subscription, false)
			}
			Message::SignalEmit(emit) => {
				self.handle_signal_emit(transport, emit);
				Ok(())
			}
		}
	}

	/// Creates or refreshes proxies. The first `init` on a link completes
	/// the handshake and replays buffered messages.
	fn handle_init(&self, transport: TransportId, init: Init) -> Result<()> {
		let (completion, replay) = {
			let mut links = self.links.lock();
			let entry = links.get_mut(&transport).ok_or(Error::NotConnected)?;

			for (name, descriptor) in init.objects {
				match entry.proxies.get(&name) {
					Some(proxy) => proxy.refresh(descriptor),
					None => {
						let proxy = ProxyObject::new(
							name.clone(),
							init.channel.clone(),
							Arc::clone(&entry.link),
							self.weak(),
							descriptor,
						);
						entry.proxies.insert(name, Arc::new(proxy));
					}
				}
			}

			match std::mem::replace(&mut entry.phase, Phase::Established) {
				Phase::Handshaking { buffered, promise } => {
					let snapshot: ProxyMap = entry.proxies.clone();
					(promise.map(|p| (p, snapshot)), buffered)
				}
				Phase::Established => (None, VecDeque::new()),
			}
		};

		if let Some((promise, snapshot)) = completion {
			tracing::debug!(
				%transport,
				peer = %init.channel,
				objects = snapshot.len(),
				"Handshake complete"
			);
			promise.complete(Ok(snapshot));
		}

		for message in replay {
			if let Err(e) = self.dispatch(transport, message) {
				tracing::error!(%transport, "Error dispatching buffered message: {}", e);
			}
		}
		Ok(())
	}

	fn proxy_for(&self, transport: TransportId, name: &str) -> Option<Arc<ProxyObject>> {
		self.links
			.lock()
			.get(&transport)
			.and_then(|entry| entry.proxies.get(name).cloned())
	}

	fn apply_updates(&self, transport: TransportId, updates: Vec<PropertyUpdate>) {
		for update in updates {
			match self.proxy_for(transport, &update.object) {
				Some(proxy) => proxy.apply_update(&update.property, update.value),
				None => tracing::debug!(
					%transport,
					object = %update.object,
					"Property update for unknown proxy (ignored)"
				),
			}
		}
	}

	fn registered(&self, name: &str) -> Result<Arc<RegisteredObject>> {
		self.objects
			.lock()
			.get(name)
			.cloned()
			.ok_or_else(|| Error::NoSuchObject(name.to_string()))
	}

	fn handle_set_property(&self, set: SetProperty) -> Result<()> {
		let entry = self.registered(&set.object)?;
		match entry.is_readonly(&set.property) {
			None => Err(Error::UnknownProperty {
				object: set.object,
				property: set.property,
			}),
			Some(true) => Err(Error::ReadOnlyProperty {
				object: set.object,
				property: set.property,
			}),
			Some(false) => {
				entry.object().set_property(&set.property, set.value)?;
				self.property_changed(entry.object(), &set.property)
			}
		}
	}

	fn handle_invoke_request(&self, transport: TransportId, request: InvokeRequest) -> Result<()> {
		let InvokeRequest {
			id,
			object,
			method,
			args,
		} = request;

		let result = self
			.registered(&object)
			.and_then(|entry| call_method(&entry, &method, args));

		let response = match result {
			Ok(value) => InvokeResponse::ok(id, value),
			Err(e) => {
				tracing::debug!(id, object = %object, method = %method, "Invocation failed: {}", e);
				InvokeResponse::err(id, e.to_payload())
			}
		};
		self.link(transport)?
			.send(Message::InvokeResponse(response))
	}

	fn handle_invoke_response(&self, transport: TransportId, response: InvokeResponse) -> Result<()> {
		let id = response.id;
		let invocation = self
			.pending
			.lock()
			.take_from(id, transport)
			.ok_or_else(|| {
				Error::ProtocolError(format!("Cannot find request to respond: id={}", id))
			})?;

		let result = response
			.into_outcome()
			.map_err(|payload| Error::from_payload(payload, &invocation.object));
		tracing::debug!(id, ok = result.is_ok(), "Completing invocation");
		invocation.promise.complete(result);
		Ok(())
	}

	fn handle_subscription(
		&self,
		transport: TransportId,
		subscription: SignalSubscription,
		connect: bool,
	) -> Result<()> {
		let SignalSubscription { object, signal } = subscription;
		let entry = self.registered(&object)?;
		if !entry.has_signal(signal) {
			return Err(Error::UnknownSignal {
				object,
				index: signal,
			});
		}

		let mut links = self.links.lock();
		let link = links.get_mut(&transport).ok_or(Error::NotConnected)?;
		if connect {
			link.subscriptions.insert((object, signal));
		} else {
			link.subscriptions.remove(&(object, signal));
		}
		Ok(())
	}

	fn handle_signal_emit(&self, transport: TransportId, emit: SignalEmit) {
		match self.proxy_for(transport, &emit.object) {
			Some(proxy) => proxy.emit(emit.signal, &emit.args),
			None => tracing::debug!(
				%transport,
				object = %emit.object,
				"Signal for unknown proxy (ignored)"
			),
		}
	}
}

/// Resolves `method` on a registered object and runs it.
fn call_method(entry: &RegisteredObject, method: &str, args: Vec<Value>) -> Result<Value> {
	let no_such_method = || Error::NoSuchMethod {
		object: entry.name().to_string(),
		signature: method.to_string(),
	};
	let signature: MethodSignature = method.parse().map_err(|_| no_such_method())?;
	let signature = entry.method(&signature.to_string()).ok_or_else(no_such_method)?;
	if signature.arity() != args.len() {
		return Err(Error::InvalidArgument(format!(
			"{} takes {} argument(s), got {}",
			signature,
			signature.arity(),
			args.len()
		)));
	}
	entry.object().invoke(signature, args)
}
