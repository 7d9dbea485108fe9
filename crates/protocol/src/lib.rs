//! Wire types for the hybridge protocol.
//!
//! This crate contains the serde-serializable types exchanged by two
//! hybridge channels over a transport. They describe the shape of data on
//! the wire and nothing else; the dispatch engine lives in
//! `hybridge-runtime`.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization and validation
//! - **Encoding-agnostic**: Any serde format works; [`encode`]/[`decode`] provide JSON text
//! - **Stable**: Changes only when the wire protocol changes

pub mod descriptor;
pub mod message;
pub mod signature;

pub use descriptor::{ObjectDescriptor, PropertyDescriptor};
pub use message::{
	ErrorPayload, Init, InvokeRequest, InvokeResponse, Message, PropertyBatchUpdate,
	PropertyUpdate, SetProperty, SignalEmit, SignalSubscription, decode, encode,
};
pub use signature::{MethodSignature, SignatureError};
