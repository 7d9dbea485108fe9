//! Application objects exposed through a channel.
//!
//! The channel has no reflection to lean on, so an exposed type describes
//! itself with [`Object::class_info`] and serves reads, writes and calls
//! through the remaining trait methods. The class info is taken once at
//! registration and advertised to every peer.

use std::collections::BTreeMap;
use std::sync::Arc;

use downcast_rs::{DowncastSync, impl_downcast};
use hybridge_protocol::{MethodSignature, ObjectDescriptor, PropertyDescriptor};
use serde_json::Value;

use crate::error::{Error, Result};

/// An application object that can be registered with a channel.
///
/// Implementations are shared with the channel through `Arc` and may be
/// called from the transport delivery thread.
pub trait Object: DowncastSync {
	/// Properties, methods and signals advertised to peers.
	fn class_info(&self) -> ClassInfo;

	/// Current value of `name`, or `None` if the property does not exist.
	fn property(&self, name: &str) -> Option<Value>;

	/// Writes a property on behalf of a peer.
	///
	/// Only called for properties advertised as writable. The channel
	/// announces the new value after this returns `Ok`.
	fn set_property(&self, name: &str, value: Value) -> Result<()> {
		let _ = value;
		Err(Error::MethodFailed(format!("property '{name}' is not writable")))
	}

	/// Runs a method on behalf of a peer. `args` has already been checked
	/// against the signature's parameter count.
	fn invoke(&self, method: &MethodSignature, args: Vec<Value>) -> Result<Value> {
		let _ = args;
		Err(Error::MethodFailed(format!("{method} is not implemented")))
	}
}

impl_downcast!(sync Object);

/// Builder describing what an [`Object`] exposes.
///
/// ```ignore
/// ClassInfo::new()
///     .property("x")
///     .readonly_property("name")
///     .method("incX()")
///     .signals(1)
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassInfo {
	properties: BTreeMap<String, bool>,
	methods: Vec<String>,
	signal_count: usize,
}

impl ClassInfo {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a writable property.
	pub fn property(mut self, name: impl Into<String>) -> Self {
		self.properties.insert(name.into(), false);
		self
	}

	/// Adds a property peers cannot write.
	pub fn readonly_property(mut self, name: impl Into<String>) -> Self {
		self.properties.insert(name.into(), true);
		self
	}

	/// Adds a method by signature, e.g. `add(int,int)`. Validated when the
	/// object is registered.
	pub fn method(mut self, signature: impl Into<String>) -> Self {
		self.methods.push(signature.into());
		self
	}

	/// Sets the number of signals, addressed by index `0..count`.
	pub fn signals(mut self, count: usize) -> Self {
		self.signal_count = count;
		self
	}
}

/// Registry entry for one named object.
pub(crate) struct RegisteredObject {
	name: String,
	object: Arc<dyn Object>,
	properties: BTreeMap<String, bool>,
	methods: BTreeMap<String, MethodSignature>,
	signal_count: usize,
}

impl RegisteredObject {
	pub(crate) fn new(name: String, object: Arc<dyn Object>) -> Result<Self> {
		let info = object.class_info();
		let mut methods = BTreeMap::new();
		for raw in &info.methods {
			let signature: MethodSignature = raw
				.parse()
				.map_err(|e| Error::InvalidArgument(format!("object '{name}': {e}")))?;
			methods.insert(signature.to_string(), signature);
		}

		Ok(Self {
			name,
			object,
			properties: info.properties,
			methods,
			signal_count: info.signal_count,
		})
	}

	pub(crate) fn name(&self) -> &str {
		&self.name
	}

	pub(crate) fn object(&self) -> &Arc<dyn Object> {
		&self.object
	}

	/// Returns true if this entry holds the allocation behind `object`.
	pub(crate) fn is<O: ?Sized>(&self, object: &Arc<O>) -> bool {
		crate::link::same_object(&self.object, object)
	}

	pub(crate) fn has_property(&self, name: &str) -> bool {
		self.properties.contains_key(name)
	}

	/// `Some(readonly)` for advertised properties.
	pub(crate) fn is_readonly(&self, name: &str) -> Option<bool> {
		self.properties.get(name).copied()
	}

	/// Looks up a method by normalized signature.
	pub(crate) fn method(&self, signature: &str) -> Option<&MethodSignature> {
		self.methods.get(signature)
	}

	pub(crate) fn has_signal(&self, index: usize) -> bool {
		index < self.signal_count
	}

	/// Current value of an advertised property.
	pub(crate) fn value(&self, property: &str) -> Value {
		self.object.property(property).unwrap_or(Value::Null)
	}

	/// Builds the descriptor advertised in `init`, with current values.
	pub(crate) fn describe(&self) -> ObjectDescriptor {
		let properties = self
			.properties
			.iter()
			.map(|(name, readonly)| {
				let value = self.value(name);
				let descriptor = if *readonly {
					PropertyDescriptor::readonly(value)
				} else {
					PropertyDescriptor::new(value)
				};
				(name.clone(), descriptor)
			})
			.collect();

		ObjectDescriptor {
			properties,
			methods: self.methods.keys().cloned().collect(),
			signal_count: self.signal_count,
		}
	}
}
