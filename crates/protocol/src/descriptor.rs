//! Object descriptors advertised during the handshake.
//!
//! A descriptor is what a peer learns about one registered object: its
//! properties with their current values, the method signatures it can
//! invoke, and how many signals it can subscribe to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One advertised property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
	/// Value at the time the descriptor was built.
	pub value: Value,
	/// Read-only properties reject remote writes locally.
	#[serde(default, skip_serializing_if = "is_false")]
	pub readonly: bool,
}

impl PropertyDescriptor {
	/// Creates a writable property descriptor.
	pub fn new(value: Value) -> Self {
		Self {
			value,
			readonly: false,
		}
	}

	/// Creates a read-only property descriptor.
	pub fn readonly(value: Value) -> Self {
		Self {
			value,
			readonly: true,
		}
	}
}

fn is_false(b: &bool) -> bool {
	!*b
}

/// Full descriptor of one registered object as carried by `Init`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDescriptor {
	/// Property name to descriptor.
	#[serde(default)]
	pub properties: BTreeMap<String, PropertyDescriptor>,
	/// Normalized method signatures, e.g. `incX()` or `add(int,int)`.
	#[serde(default)]
	pub methods: Vec<String>,
	/// Signals are addressed by index in `0..signal_count`.
	#[serde(default)]
	pub signal_count: usize,
}

impl ObjectDescriptor {
	/// Returns the descriptor of `name`, if advertised.
	pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
		self.properties.get(name)
	}

	/// Returns true if `signature` is one of the advertised methods.
	pub fn has_method(&self, signature: &str) -> bool {
		self.methods.iter().any(|m| m == signature)
	}

	/// Returns true if `index` addresses an advertised signal.
	pub fn has_signal(&self, index: usize) -> bool {
		index < self.signal_count
	}
}
