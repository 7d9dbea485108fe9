//! The channel: registered objects, connected transports and the change queue.
//!
//! A [`Channel`] is one endpoint of the bridge. Local objects registered on
//! it are advertised to every connected peer; the peer's objects come back
//! as [`ProxyObject`]s once its `init` arrives.
//!
//! # Locking
//!
//! The object registry, the link table, the pending table and the change
//! queue each sit behind their own mutex. No operation holds two of them at
//! once, and promises, signal handlers and application object calls all run
//! with every channel lock released.
//!
//! The timer lock is the one exception. It is held across `Timer::start` and
//! `Timer::stop` together with the running flag, and the change queue may be
//! locked briefly beneath it. Nothing takes the timer lock while holding
//! another channel lock.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use hybridge_protocol::{
	Init, InvokeRequest, Message, ObjectDescriptor, PropertyBatchUpdate, PropertyUpdate,
	SignalEmit,
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::config::ChannelConfig;
use crate::error::{Error, Result};
use crate::ids::{IdGenerator, UuidGenerator};
use crate::link::{Inbound, Link, LinkState, TransportId, same_object};
use crate::object::{Object, RegisteredObject};
use crate::pending::{PendingInvocation, PendingTable};
use crate::promise::{Completion, Promise};
use crate::proxy::{ProxyMap, ProxyObject};
use crate::timer::{NoopTimer, Timer, TimerTick};
use crate::transport::Transport;

/// Handshake progress of one link.
pub(crate) enum Phase {
	Handshaking {
		buffered: VecDeque<Message>,
		promise: Option<Promise<ProxyMap>>,
	},
	Established,
}

/// Link table entry.
pub(crate) struct LinkEntry {
	pub(crate) link: Arc<Link>,
	pub(crate) phase: Phase,
	/// Proxies for the peer's objects.
	pub(crate) proxies: ProxyMap,
	/// Local object names already sent to this peer in an `init`.
	pub(crate) advertised: BTreeSet<String>,
	/// (object, signal) pairs the peer subscribed to.
	pub(crate) subscriptions: BTreeSet<(String, usize)>,
}

impl LinkEntry {
	fn state(&self) -> LinkState {
		match self.phase {
			Phase::Handshaking { .. } => LinkState::Handshaking,
			Phase::Established => LinkState::Established,
		}
	}
}

#[derive(Default)]
struct UpdateQueue {
	blocked: bool,
	pending: Vec<(Arc<dyn Object>, String)>,
}

/// State shared by every [`Channel`] handle, its proxies and its transports.
pub(crate) struct Shared {
	id: String,
	config: ChannelConfig,
	timer: Arc<dyn Timer>,
	weak_self: Weak<Shared>,
	next_transport: AtomicU64,
	pub(crate) objects: Mutex<BTreeMap<String, Arc<RegisteredObject>>>,
	pub(crate) links: Mutex<BTreeMap<TransportId, LinkEntry>>,
	pub(crate) pending: Mutex<PendingTable>,
	updates: Mutex<UpdateQueue>,
	/// Whether `timer` is running; held across every start and stop.
	timer_running: Mutex<bool>,
}

/// One endpoint of the bridge.
///
/// Cloning a `Channel` yields another handle to the same endpoint. When the
/// last handle drops, every transport is disconnected.
///
/// # Example
///
/// ```ignore
/// let channel = Channel::new();
/// channel.register_object("counter", Arc::new(Counter::default()))?;
/// let proxies = channel.connect_to(Arc::new(transport))?.await?;
/// ```
#[derive(Clone)]
pub struct Channel {
	shared: Arc<Shared>,
}

impl Default for Channel {
	fn default() -> Self {
		Self::new()
	}
}

impl Channel {
	/// Creates a channel with default configuration, a random id and no timer.
	pub fn new() -> Self {
		Self::builder().build()
	}

	pub fn builder() -> ChannelBuilder {
		ChannelBuilder::default()
	}

	/// Identifier sent to peers in `init`.
	pub fn id(&self) -> &str {
		&self.shared.id
	}

	pub fn config(&self) -> &ChannelConfig {
		&self.shared.config
	}

	/// Registers `object` under `name` and advertises it to every connected
	/// peer.
	pub fn register_object(&self, name: impl Into<String>, object: Arc<dyn Object>) -> Result<()> {
		let name = name.into();
		let entry = RegisteredObject::new(name.clone(), object)?;
		{
			let mut objects = self.shared.objects.lock();
			if objects.contains_key(&name) {
				return Err(Error::DuplicateName(name));
			}
			objects.insert(name.clone(), Arc::new(entry));
		}
		tracing::debug!(object = %name, "Registered object");
		self.shared.advertise_new_objects();
		Ok(())
	}

	/// Removes every registration of `object`. Returns how many names were
	/// removed.
	///
	/// Peers keep their proxies; calls against them are answered with
	/// `NoSuchObject`.
	pub fn deregister_object<O: ?Sized>(&self, object: &Arc<O>) -> usize {
		let removed: Vec<String> = {
			let mut objects = self.shared.objects.lock();
			let names: Vec<String> = objects
				.values()
				.filter(|entry| entry.is(object))
				.map(|entry| entry.name().to_string())
				.collect();
			for name in &names {
				objects.remove(name);
			}
			names
		};
		if removed.is_empty() {
			return 0;
		}

		{
			let mut links = self.shared.links.lock();
			for entry in links.values_mut() {
				for name in &removed {
					entry.advertised.remove(name);
				}
				entry
					.subscriptions
					.retain(|(name, _)| !removed.contains(name));
			}
		}
		self.shared
			.updates
			.lock()
			.pending
			.retain(|(queued, _)| !same_object(queued, object));

		tracing::debug!(objects = ?removed, "Deregistered object");
		removed.len()
	}

	/// Object registered under `name`.
	pub fn object(&self, name: &str) -> Option<Arc<dyn Object>> {
		self.shared
			.objects
			.lock()
			.get(name)
			.map(|entry| Arc::clone(entry.object()))
	}

	pub fn object_names(&self) -> Vec<String> {
		self.shared.objects.lock().keys().cloned().collect()
	}

	/// Queues property changes until the next [`timer_event`](Self::timer_event).
	pub fn block_updates(&self) -> Result<()> {
		self.set_block_updates(true)
	}

	/// Switches between immediate and batched property updates.
	///
	/// Unblocking does not flush; queued changes go out with the next
	/// `timer_event`, after which the timer is stopped. If the timer fails
	/// to start, updates stay blocked and the error is returned; a later
	/// `block_updates` retries the start.
	pub fn set_block_updates(&self, block: bool) -> Result<()> {
		self.shared.updates.lock().blocked = block;
		if block {
			self.shared.ensure_timer()?;
		}
		Ok(())
	}

	pub fn updates_blocked(&self) -> bool {
		self.shared.updates.lock().blocked
	}

	/// Reports that `property` of `object` changed.
	///
	/// Sent immediately to every peer the object was advertised to, or
	/// queued while updates are blocked.
	pub fn property_changed<O: ?Sized>(&self, object: &Arc<O>, property: &str) -> Result<()> {
		self.shared.property_changed(object, property)
	}

	/// Reports that signal `index` of `object` fired. Sent to every peer
	/// subscribed to it.
	pub fn signal_emitted<O: ?Sized>(&self, object: &Arc<O>, index: usize, args: Vec<Value>) -> Result<()> {
		let names = self.shared.names_of(object)?;
		for entry in &names {
			if !entry.has_signal(index) {
				return Err(Error::UnknownSignal {
					object: entry.name().to_string(),
					index,
				});
			}
		}

		let links = self.shared.links.lock();
		for entry in names {
			let key = (entry.name().to_string(), index);
			for link_entry in links.values().filter(|l| l.subscriptions.contains(&key)) {
				let message = Message::SignalEmit(SignalEmit {
					object: key.0.clone(),
					signal: index,
					args: args.clone(),
				});
				if let Err(e) = link_entry.link.send(message) {
					tracing::warn!(transport = %link_entry.link.id(), "Failed to send signal: {}", e);
				}
			}
		}
		Ok(())
	}

	/// Flushes queued property changes as one `propertyBatchUpdate` per peer.
	pub fn timer_event(&self) {
		self.shared.timer_event();
	}

	/// Adopts `transport`, sends the local `init` and resolves with the
	/// peer's objects once its `init` arrives.
	///
	/// Dropping the returned [`Handshake`] does not cancel anything; the
	/// proxies remain available through [`proxies`](Self::proxies).
	pub fn connect_to(&self, transport: Arc<dyn Transport>) -> Result<Handshake> {
		let (promise, completion) = Promise::channel();
		let transport_id = self.shared.connect(transport, promise)?;
		Ok(Handshake {
			transport_id,
			completion,
		})
	}

	/// Same as [`connect_to`](Self::connect_to), delivering the proxies to
	/// `on_result` instead.
	pub fn connect_to_with<F>(&self, transport: Arc<dyn Transport>, on_result: F) -> Result<TransportId>
	where
		F: FnOnce(Result<ProxyMap>) + Send + 'static,
	{
		self.shared.connect(transport, Promise::callback(on_result))
	}

	/// Disconnects the link carrying `transport`.
	pub fn disconnect_from<T: ?Sized>(&self, transport: &Arc<T>) -> Result<()> {
		let id = self
			.shared
			.links
			.lock()
			.iter()
			.find(|(_, entry)| entry.link.carries(transport))
			.map(|(id, _)| *id)
			.ok_or(Error::NotConnected)?;
		self.disconnect(id)
	}

	/// Disconnects transport `id`.
	///
	/// Outstanding invocations and an unfinished handshake fail with
	/// [`Error::ConnectionClosed`], and the link's proxies are invalidated.
	pub fn disconnect(&self, id: TransportId) -> Result<()> {
		let entry = self.shared.links.lock().remove(&id).ok_or(Error::NotConnected)?;
		self.shared.teardown(entry);
		Ok(())
	}

	/// Disconnects every transport.
	pub fn close(&self) {
		self.shared.close();
	}

	pub fn transports(&self) -> Vec<TransportId> {
		self.shared.links.lock().keys().copied().collect()
	}

	/// State of transport `id`. Unknown ids report [`LinkState::Closed`].
	pub fn link_state(&self, id: TransportId) -> LinkState {
		self.shared
			.links
			.lock()
			.get(&id)
			.map_or(LinkState::Closed, LinkEntry::state)
	}

	/// Proxies discovered on transport `id` so far.
	pub fn proxies(&self, id: TransportId) -> Result<ProxyMap> {
		self.shared
			.links
			.lock()
			.get(&id)
			.map(|entry| entry.proxies.clone())
			.ok_or(Error::NotConnected)
	}

	/// Proxy for the peer object `name` on transport `id`.
	pub fn proxy(&self, id: TransportId, name: &str) -> Option<Arc<ProxyObject>> {
		self.shared
			.links
			.lock()
			.get(&id)
			.and_then(|entry| entry.proxies.get(name).cloned())
	}

	/// Number of invocations awaiting a response.
	pub fn pending_invocations(&self) -> usize {
		self.shared.pending.lock().len()
	}
}

impl std::fmt::Debug for Channel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Channel")
			.field("id", &self.shared.id)
			.field("transports", &self.transports())
			.finish_non_exhaustive()
	}
}

/// Builder for [`Channel`].
#[derive(Default)]
pub struct ChannelBuilder {
	config: ChannelConfig,
	timer: Option<Arc<dyn Timer>>,
	id_generator: Option<Box<dyn IdGenerator>>,
}

impl ChannelBuilder {
	pub fn config(mut self, config: ChannelConfig) -> Self {
		self.config = config;
		self
	}

	/// Timer driving batched flushes. Defaults to [`NoopTimer`].
	pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
		self.timer = Some(timer);
		self
	}

	/// Source of the channel id. Defaults to [`UuidGenerator`].
	pub fn id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
		self.id_generator = Some(Box::new(generator));
		self
	}

	pub fn build(self) -> Channel {
		let id = match &self.id_generator {
			Some(generator) => generator.create_uuid(),
			None => UuidGenerator.create_uuid(),
		};
		let timer = self.timer.unwrap_or_else(|| Arc::new(NoopTimer));
		let config = self.config;

		let shared = Arc::new_cyclic(|weak_self| Shared {
			id,
			config,
			timer,
			weak_self: weak_self.clone(),
			next_transport: AtomicU64::new(0),
			objects: Mutex::new(BTreeMap::new()),
			links: Mutex::new(BTreeMap::new()),
			pending: Mutex::new(PendingTable::default()),
			updates: Mutex::new(UpdateQueue::default()),
			timer_running: Mutex::new(false),
		});
		tracing::debug!(channel = %shared.id, "Created channel");
		Channel { shared }
	}
}

/// Future resolving to the peer's proxies once its `init` arrives.
#[must_use = "dropping a Handshake keeps the connection; await it to get the proxies"]
pub struct Handshake {
	transport_id: TransportId,
	completion: Completion<ProxyMap>,
}

impl Handshake {
	pub fn transport_id(&self) -> TransportId {
		self.transport_id
	}

	/// Blocks until the handshake finishes. Not for use on a runtime worker.
	pub fn wait(self) -> Result<ProxyMap> {
		self.completion.wait()
	}
}

impl Future for Handshake {
	type Output = Result<ProxyMap>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.completion).poll(cx)
	}
}

impl Shared {
	pub(crate) fn weak(&self) -> Weak<Shared> {
		self.weak_self.clone()
	}

	pub(crate) fn config(&self) -> &ChannelConfig {
		&self.config
	}

	pub(crate) fn has_transport(&self, id: TransportId) -> bool {
		self.links.lock().contains_key(&id)
	}

	pub(crate) fn link(&self, id: TransportId) -> Result<Arc<Link>> {
		self.links
			.lock()
			.get(&id)
			.map(|entry| Arc::clone(&entry.link))
			.ok_or(Error::NotConnected)
	}

	/// Registry entries holding `object`.
	fn names_of<O: ?Sized>(&self, object: &Arc<O>) -> Result<Vec<Arc<RegisteredObject>>> {
		let entries: Vec<_> = self
			.objects
			.lock()
			.values()
			.filter(|entry| entry.is(object))
			.cloned()
			.collect();
		if entries.is_empty() {
			return Err(Error::NoSuchObject(format!(
				"{:p}",
				Arc::as_ptr(object).cast::<()>()
			)));
		}
		Ok(entries)
	}

	fn connect(&self, transport: Arc<dyn Transport>, promise: Promise<ProxyMap>) -> Result<TransportId> {
		let id = TransportId::new(self.next_transport.fetch_add(1, Ordering::SeqCst));
		let link = Arc::new(Link::new(id, Arc::clone(&transport)));
		{
			let mut links = self.links.lock();
			if links.values().any(|entry| entry.link.carries(&transport)) {
				return Err(Error::AlreadyConnected);
			}
			links.insert(
				id,
				LinkEntry {
					link: Arc::clone(&link),
					phase: Phase::Handshaking {
						buffered: VecDeque::new(),
						promise: Some(promise),
					},
					proxies: ProxyMap::new(),
					advertised: BTreeSet::new(),
					subscriptions: BTreeSet::new(),
				},
			);
		}

		if let Err(e) = transport.attach(Inbound::new(self.weak(), id)) {
			self.abandon(id);
			return Err(e);
		}

		// Descriptors read application objects, so build them before locking.
		let snapshot: Vec<Arc<RegisteredObject>> = self.objects.lock().values().cloned().collect();
		let objects: BTreeMap<String, ObjectDescriptor> = snapshot
			.iter()
			.map(|entry| (entry.name().to_string(), entry.describe()))
			.collect();

		let sent = {
			let mut links = self.links.lock();
			match links.get_mut(&id) {
				Some(entry) => {
					entry.advertised.extend(objects.keys().cloned());
					link.send(Message::Init(Init {
						channel: self.id.clone(),
						objects,
					}))
				}
				None => Err(Error::ConnectionClosed),
			}
		};
		if let Err(e) = sent {
			tracing::error!(transport = %id, "Failed to send init: {}", e);
			self.abandon(id);
			return Err(e);
		}

		tracing::debug!(transport = %id, "Connected transport, awaiting peer init");
		// Objects registered while the init was being built.
		self.advertise_new_objects();
		Ok(id)
	}

	/// Drops a link whose connect failed. Its promise is dropped unfired.
	fn abandon(&self, id: TransportId) {
		let entry = self.links.lock().remove(&id);
		if let Some(entry) = entry {
			entry.link.close();
			entry.link.transport().detach();
		}
	}

	/// Sends an incremental `init` with every registered object a link has
	/// not been told about yet.
	fn advertise_new_objects(&self) {
		let snapshot: Vec<Arc<RegisteredObject>> = self.objects.lock().values().cloned().collect();
		let missing: BTreeSet<String> = {
			let links = self.links.lock();
			snapshot
				.iter()
				.map(|entry| entry.name())
				.filter(|name| links.values().any(|l| !l.advertised.contains(*name)))
				.map(str::to_string)
				.collect()
		};
		if missing.is_empty() {
			return;
		}

		let described: BTreeMap<String, ObjectDescriptor> = snapshot
			.iter()
			.filter(|entry| missing.contains(entry.name()))
			.map(|entry| (entry.name().to_string(), entry.describe()))
			.collect();

		let mut links = self.links.lock();
		for entry in links.values_mut() {
			let objects: BTreeMap<String, ObjectDescriptor> = described
				.iter()
				.filter(|(name, _)| !entry.advertised.contains(*name))
				.map(|(name, descriptor)| (name.clone(), descriptor.clone()))
				.collect();
			if objects.is_empty() {
				continue;
			}
			entry.advertised.extend(objects.keys().cloned());
			let message = Message::Init(Init {
				channel: self.id.clone(),
				objects,
			});
			if let Err(e) = entry.link.send(message) {
				tracing::warn!(transport = %entry.link.id(), "Failed to advertise objects: {}", e);
			}
		}
	}

	pub(crate) fn property_changed<O: ?Sized>(&self, object: &Arc<O>, property: &str) -> Result<()> {
		let entries = self.names_of(object)?;
		if let Some(entry) = entries.iter().find(|entry| !entry.has_property(property)) {
			return Err(Error::UnknownProperty {
				object: entry.name().to_string(),
				property: property.to_string(),
			});
		}

		{
			let mut updates = self.updates.lock();
			if updates.blocked {
				let queued = updates
					.pending
					.iter()
					.any(|(o, p)| same_object(o, object) && p == property);
				if !queued {
					updates
						.pending
						.push((Arc::clone(entries[0].object()), property.to_string()));
				}
				return Ok(());
			}
		}

		let updates: Vec<PropertyUpdate> = entries
			.iter()
			.map(|entry| PropertyUpdate {
				object: entry.name().to_string(),
				property: property.to_string(),
				value: entry.value(property),
			})
			.collect();

		let links = self.links.lock();
		for update in updates {
			for entry in links.values().filter(|l| l.advertised.contains(&update.object)) {
				if let Err(e) = entry.link.send(Message::PropertyUpdate(update.clone())) {
					tracing::warn!(transport = %entry.link.id(), "Failed to send property update: {}", e);
				}
			}
		}
		Ok(())
	}

	/// Starts the timer unless it is already running.
	///
	/// `blocked` is always set before this takes the timer lock, so a flush
	/// that stops the timer either sees the new flag or is followed by this
	/// restart.
	fn ensure_timer(&self) -> Result<()> {
		let mut running = self.timer_running.lock();
		if *running {
			return Ok(());
		}
		self.timer
			.start(self.config.update_interval, TimerTick::new(self.weak_self.clone()))?;
		*running = true;
		Ok(())
	}

	/// Stops the timer if it runs and updates are no longer blocked.
	fn stop_timer_if_unblocked(&self) {
		let mut running = self.timer_running.lock();
		if *running && !self.updates.lock().blocked {
			self.timer.stop();
			*running = false;
		}
	}

	pub(crate) fn timer_event(&self) {
		let queued = std::mem::take(&mut self.updates.lock().pending);
		self.stop_timer_if_unblocked();
		if queued.is_empty() {
			return;
		}

		let targets: Vec<(Arc<RegisteredObject>, String)> = {
			let objects = self.objects.lock();
			queued
				.iter()
				.flat_map(|(object, property)| {
					objects
						.values()
						.filter(|entry| entry.is(object))
						.map(|entry| (Arc::clone(entry), property.clone()))
						.collect::<Vec<_>>()
				})
				.collect()
		};
		let updates: Vec<PropertyUpdate> = targets
			.iter()
			.map(|(entry, property)| PropertyUpdate {
				object: entry.name().to_string(),
				property: property.clone(),
				value: entry.value(property),
			})
			.collect();

		let links = self.links.lock();
		for entry in links.values() {
			let batch: Vec<PropertyUpdate> = updates
				.iter()
				.filter(|u| entry.advertised.contains(&u.object))
				.cloned()
				.collect();
			if batch.is_empty() {
				continue;
			}
			tracing::debug!(transport = %entry.link.id(), count = batch.len(), "Flushing property batch");
			let message = Message::PropertyBatchUpdate(PropertyBatchUpdate { updates: batch });
			if let Err(e) = entry.link.send(message) {
				tracing::warn!(transport = %entry.link.id(), "Failed to send property batch: {}", e);
			}
		}
	}

	/// Registers an outgoing call and sends its request.
	pub(crate) fn invoke(
		&self,
		link: &Arc<Link>,
		object: &str,
		method: String,
		args: Vec<Value>,
		promise: Promise<Value>,
	) {
		let id = {
			let mut pending = self.pending.lock();
			if link.is_closed() {
				drop(pending);
				promise.complete(Err(Error::ConnectionClosed));
				return;
			}
			pending.insert(PendingInvocation {
				transport: link.id(),
				object: object.to_string(),
				method: method.clone(),
				promise,
			})
		};

		tracing::debug!(id, object, method = %method, "Invoking remote method");
		let request = Message::InvokeRequest(InvokeRequest {
			id,
			object: object.to_string(),
			method,
			args,
		});
		if let Err(e) = link.send(request) {
			let entry = self.pending.lock().take(id);
			if let Some(entry) = entry {
				entry.promise.complete(Err(e));
			}
		}
	}

	/// Fails everything that depended on a removed link.
	fn teardown(&self, entry: LinkEntry) {
		let LinkEntry {
			link,
			phase,
			proxies,
			..
		} = entry;
		link.close();

		let failed = self.pending.lock().drain_transport(link.id());
		for (id, invocation) in failed {
			tracing::debug!(
				id,
				object = %invocation.object,
				method = %invocation.method,
				"Failing invocation on disconnect"
			);
			invocation.promise.complete(Err(Error::ConnectionClosed));
		}

		for proxy in proxies.values() {
			proxy.invalidate();
		}

		if let Phase::Handshaking {
			promise: Some(promise),
			..
		} = phase
		{
			promise.complete(Err(Error::ConnectionClosed));
		}

		link.transport().detach();
		tracing::debug!(transport = %link.id(), "Disconnected transport");
	}

	fn close(&self) {
		let entries: Vec<LinkEntry> = {
			let mut links = self.links.lock();
			std::mem::take(&mut *links).into_values().collect()
		};
		for entry in entries {
			self.teardown(entry);
		}
	}
}

impl Drop for Shared {
	fn drop(&mut self) {
		self.close();
		if *self.timer_running.get_mut() {
			self.timer.stop();
		}
	}
}
