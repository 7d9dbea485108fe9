//! Error types for the hybridge runtime.

use hybridge_protocol::ErrorPayload;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the hybridge runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// An object is already registered under this name.
	#[error("Object name already registered: {0}")]
	DuplicateName(String),

	/// Operation against a deregistered or never-advertised object.
	#[error("No such object: {0}")]
	NoSuchObject(String),

	/// Method signature is not part of the object's descriptor.
	#[error("No such method: {object}.{signature}")]
	NoSuchMethod { object: String, signature: String },

	/// Property is not part of the object's descriptor.
	#[error("Unknown property: {object}.{property}")]
	UnknownProperty { object: String, property: String },

	/// Property exists but rejects writes.
	#[error("Property is read-only: {object}.{property}")]
	ReadOnlyProperty { object: String, property: String },

	/// Signal index outside the advertised signal count.
	#[error("Unknown signal {index} on {object}")]
	UnknownSignal { object: String, index: usize },

	/// Invalid argument provided to a method or operation.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// The transport is already connected to this channel.
	#[error("Transport already connected")]
	AlreadyConnected,

	/// The transport is not connected to this channel.
	#[error("Transport not connected")]
	NotConnected,

	/// The link closed before the operation completed.
	#[error("Connection closed")]
	ConnectionClosed,

	/// Transport-level failure reported by a carrier.
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Protocol-level error (unexpected or inconsistent message).
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// The update timer could not be started.
	#[error("Timer error: {0}")]
	Timer(String),

	/// A local object's method or setter failed.
	#[error("Method failed: {0}")]
	MethodFailed(String),

	/// Peer error that has no local counterpart.
	#[error("{name}: {message}")]
	Remote { name: String, message: String },

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Wire name of the error kind.
	pub fn name(&self) -> &str {
		match self {
			Error::DuplicateName(_) => "DuplicateName",
			Error::NoSuchObject(_) => "NoSuchObject",
			Error::NoSuchMethod { .. } => "NoSuchMethod",
			Error::UnknownProperty { .. } => "UnknownProperty",
			Error::ReadOnlyProperty { .. } => "ReadOnlyProperty",
			Error::UnknownSignal { .. } => "UnknownSignal",
			Error::InvalidArgument(_) => "InvalidArgument",
			Error::AlreadyConnected => "AlreadyConnected",
			Error::NotConnected => "NotConnected",
			Error::ConnectionClosed => "ConnectionClosed",
			Error::TransportError(_) => "TransportError",
			Error::ProtocolError(_) => "ProtocolError",
			Error::Timer(_) => "Timer",
			Error::MethodFailed(_) => "MethodFailed",
			Error::Remote { name, .. } => name.as_str(),
			Error::Json(_) => "Json",
		}
	}

	/// Converts the error into the payload of a failed `InvokeResponse`.
	///
	/// The message carries the variant's detail so the requesting side can
	/// rebuild the same variant with [`Error::from_payload`].
	pub fn to_payload(&self) -> ErrorPayload {
		let message = match self {
			Error::NoSuchObject(object) => object.clone(),
			Error::NoSuchMethod { signature, .. } => signature.clone(),
			Error::UnknownProperty { property, .. } | Error::ReadOnlyProperty { property, .. } => {
				property.clone()
			}
			Error::InvalidArgument(msg) | Error::MethodFailed(msg) => msg.clone(),
			Error::Remote { message, .. } => message.clone(),
			other => other.to_string(),
		};
		ErrorPayload {
			name: self.name().to_string(),
			message,
		}
	}

	/// Rebuilds an error received for a call on `object`.
	pub fn from_payload(payload: ErrorPayload, object: &str) -> Self {
		let ErrorPayload { name, message } = payload;
		match name.as_str() {
			"NoSuchObject" => Error::NoSuchObject(message),
			"NoSuchMethod" => Error::NoSuchMethod {
				object: object.to_string(),
				signature: message,
			},
			"UnknownProperty" => Error::UnknownProperty {
				object: object.to_string(),
				property: message,
			},
			"ReadOnlyProperty" => Error::ReadOnlyProperty {
				object: object.to_string(),
				property: message,
			},
			"InvalidArgument" => Error::InvalidArgument(message),
			"MethodFailed" => Error::MethodFailed(message),
			"ConnectionClosed" => Error::ConnectionClosed,
			_ => Error::Remote { name, message },
		}
	}

	/// Returns true if the link closed underneath the operation.
	pub fn is_connection_closed(&self) -> bool {
		matches!(self, Error::ConnectionClosed)
	}

	/// Returns true for errors produced by synchronous local validation.
	pub fn is_local_validation(&self) -> bool {
		matches!(
			self,
			Error::NoSuchMethod { .. }
				| Error::UnknownProperty { .. }
				| Error::ReadOnlyProperty { .. }
				| Error::UnknownSignal { .. }
				| Error::InvalidArgument(_)
		)
	}
}
