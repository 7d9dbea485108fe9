//! Hybridge Runtime - Channels, proxy objects and dispatch
//!
//! This crate implements the remote-object bridge on top of the wire types
//! in `hybridge-protocol`:
//!
//! - **Channel**: Registered objects, connected transports and batched property updates
//! - **Proxy objects**: Cached peer objects with property, method and signal access
//! - **Invocation**: Correlated requests with exactly-once completion
//! - **Transport**: Carrier trait plus an in-process JSON transport
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐                     ┌───────────────┐
//! │   Channel A   │                     │   Channel B   │
//! │ ┌───────────┐ │   init / invoke /   │ ┌───────────┐ │
//! │ │ objects   │─┼──── propertyUpdate ─┼▶│ proxies   │ │
//! │ └───────────┘ │                     │ └───────────┘ │
//! │ ┌───────────┐ │   invokeResponse /  │ ┌───────────┐ │
//! │ │ proxies   │◀┼──── signalEmit ─────┼─│ objects   │ │
//! │ └───────────┘ │                     │ └───────────┘ │
//! └───────┬───────┘                     └───────┬───────┘
//!         │            Transport                │
//!         └─────────────────────────────────────┘
//! ```
//!
//! # Decoupling via Object
//!
//! The channel never sees concrete application types. Anything exposed to a
//! peer implements [`Object`], which describes its properties, methods and
//! signals and serves reads, writes and calls by name.

pub mod channel;
pub mod config;
mod dispatch;
pub mod error;
pub mod ids;
pub mod link;
pub mod object;
mod pending;
pub mod promise;
pub mod proxy;
pub mod signals;
pub mod timer;
pub mod transport;

// Re-export key types at crate root
pub use channel::{Channel, ChannelBuilder, Handshake};
pub use config::ChannelConfig;
pub use error::{Error, Result};
pub use hybridge_protocol::{MethodSignature, ObjectDescriptor, PropertyDescriptor};
pub use ids::{IdGenerator, UuidGenerator};
pub use link::{Inbound, LinkState, TransportId};
pub use object::{ClassInfo, Object};
pub use promise::{Completion, PendingCall};
pub use proxy::{MethodStub, ProxyMap, ProxyObject};
pub use signals::SignalHandler;
pub use timer::{NoopTimer, Timer, TimerTick, TokioTimer};
pub use transport::{MemoryTransport, Transport};
