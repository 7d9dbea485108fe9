//! Protocol messages exchanged between two channels.
//!
//! Every message is one variant of [`Message`]. On the JSON wire the variant
//! is selected by a `"type"` field:
//!
//! ```text
//! {"type":"init","channel":"…","objects":{"counter":{…}}}
//! {"type":"propertyUpdate","object":"counter","property":"x","value":1}
//! {"type":"invokeRequest","id":7,"object":"counter","method":"incX()","args":[]}
//! {"type":"invokeResponse","id":7,"result":0}
//! {"type":"signalEmit","object":"counter","signal":0,"args":[1]}
//! ```
//!
//! # Message Flow
//!
//! 1. Both sides send `init` with their registered objects when a transport connects
//! 2. Property pushes travel as `propertyUpdate` (immediate) or `propertyBatchUpdate` (timer flush)
//! 3. `invokeRequest` is answered by exactly one `invokeResponse` with the same id
//! 4. `signalConnect`/`signalDisconnect` toggle delivery of `signalEmit`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::ObjectDescriptor;

/// Handshake payload advertising a channel's registered objects.
///
/// Sent once with the full object set when a transport connects, and again
/// with only the new entries when an object is registered later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Init {
	/// Identifier of the advertising channel.
	pub channel: String,
	/// Object name to descriptor.
	#[serde(default)]
	pub objects: BTreeMap<String, ObjectDescriptor>,
}

/// New value of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyUpdate {
	pub object: String,
	pub property: String,
	pub value: Value,
}

/// Timer-flushed list of property updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyBatchUpdate {
	pub updates: Vec<PropertyUpdate>,
}

/// Request to write a property on the peer's object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetProperty {
	pub object: String,
	pub property: String,
	pub value: Value,
}

/// Remote method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
	/// Correlation id, unique per requesting channel.
	pub id: u64,
	pub object: String,
	/// Normalized method signature.
	pub method: String,
	#[serde(default)]
	pub args: Vec<Value>,
}

/// Result of a remote method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
	/// Correlation id of the request this answers.
	pub id: u64,
	/// Success result (mutually exclusive with error)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error result (mutually exclusive with result)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
}

impl InvokeResponse {
	/// Builds a successful response.
	pub fn ok(id: u64, result: Value) -> Self {
		Self {
			id,
			result: Some(result),
			error: None,
		}
	}

	/// Builds a failed response.
	pub fn err(id: u64, error: ErrorPayload) -> Self {
		Self {
			id,
			result: None,
			error: Some(error),
		}
	}

	/// Splits the response into its outcome. A missing result is `null`.
	pub fn into_outcome(self) -> Result<Value, ErrorPayload> {
		match self.error {
			Some(error) => Err(error),
			None => Ok(self.result.unwrap_or(Value::Null)),
		}
	}
}

/// Error details carried by a failed [`InvokeResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// Error kind name (e.g., "NoSuchObject", "NoSuchMethod")
	pub name: String,
	/// Human-readable error message
	pub message: String,
}

/// Subscription change for one signal of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSubscription {
	pub object: String,
	pub signal: usize,
}

/// Notification that a signal fired on the advertising side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEmit {
	pub object: String,
	pub signal: usize,
	#[serde(default)]
	pub args: Vec<Value>,
}

/// Discriminated union of protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
	Init(Init),
	PropertyUpdate(PropertyUpdate),
	PropertyBatchUpdate(PropertyBatchUpdate),
	SetProperty(SetProperty),
	InvokeRequest(InvokeRequest),
	InvokeResponse(InvokeResponse),
	SignalConnect(SignalSubscription),
	SignalDisconnect(SignalSubscription),
	SignalEmit(SignalEmit),
}

impl Message {
	/// Wire name of the variant, used in logs.
	pub fn kind(&self) -> &'static str {
		match self {
			Message::Init(_) => "init",
			Message::PropertyUpdate(_) => "propertyUpdate",
			Message::PropertyBatchUpdate(_) => "propertyBatchUpdate",
			Message::SetProperty(_) => "setProperty",
			Message::InvokeRequest(_) => "invokeRequest",
			Message::InvokeResponse(_) => "invokeResponse",
			Message::SignalConnect(_) => "signalConnect",
			Message::SignalDisconnect(_) => "signalDisconnect",
			Message::SignalEmit(_) => "signalEmit",
		}
	}

	/// Returns true for the handshake message.
	pub fn is_init(&self) -> bool {
		matches!(self, Message::Init(_))
	}
}

/// Encodes a message as JSON text.
pub fn encode(message: &Message) -> serde_json::Result<String> {
	serde_json::to_string(message)
}

/// Decodes a message from JSON text.
pub fn decode(text: &str) -> serde_json::Result<Message> {
	serde_json::from_str(text)
}
