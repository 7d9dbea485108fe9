// Integration tests for proxy signal subscriptions
//
// Subscriptions are reference counted per signal index: only the first
// handler sends signalConnect and only the last removal sends
// signalDisconnect.

mod support;

use std::sync::Arc;

use hybridge_protocol::{Message, SignalEmit, SignalSubscription};
use hybridge_runtime::{Channel, Error, ProxyObject, SignalHandler};
use parking_lot::Mutex;
use serde_json::{Value, json};
use support::{RecordingTransport, peer_init};

fn remote_proxy() -> (Channel, Arc<RecordingTransport>, Arc<ProxyObject>) {
	let channel = Channel::new();
	let transport = RecordingTransport::new();
	let handshake = channel.connect_to(transport.clone()).unwrap();
	transport.deliver(peer_init("remote", 0));
	let proxy = handshake.wait().unwrap()["remote"].clone();
	transport.take_sent();
	(channel, transport, proxy)
}

fn recorder(log: &Arc<Mutex<Vec<(String, Value)>>>, tag: &str) -> SignalHandler {
	let log = log.clone();
	let tag = tag.to_string();
	Arc::new(move |proxy: &ProxyObject, index: usize, args: &[Value]| {
		assert_eq!(index, 0);
		assert_eq!(proxy.name(), "remote");
		log.lock().push((tag.clone(), Value::Array(args.to_vec())));
	})
}

fn emit(transport: &RecordingTransport, args: Vec<Value>) {
	transport.deliver(Message::SignalEmit(SignalEmit {
		object: "remote".to_string(),
		signal: 0,
		args,
	}));
}

#[test]
fn test_subscription_is_reference_counted() {
	let (_channel, transport, proxy) = remote_proxy();
	let log = Arc::new(Mutex::new(Vec::new()));
	let a = recorder(&log, "a");
	let b = recorder(&log, "b");

	proxy.connect(0, a.clone()).unwrap();
	proxy.connect(0, b.clone()).unwrap();
	assert_eq!(proxy.subscriber_count(0), 2);
	proxy.disconnect(0, &a).unwrap();
	proxy.disconnect(0, &b).unwrap();
	proxy.disconnect(0, &b).unwrap();

	let expected = SignalSubscription {
		object: "remote".to_string(),
		signal: 0,
	};
	assert_eq!(
		transport.sent(),
		[
			Message::SignalConnect(expected.clone()),
			Message::SignalDisconnect(expected),
		]
	);
}

#[test]
fn test_resubscribe_after_last_removal() {
	let (_channel, transport, proxy) = remote_proxy();
	let log = Arc::new(Mutex::new(Vec::new()));
	let a = recorder(&log, "a");

	proxy.connect(0, a.clone()).unwrap();
	proxy.disconnect(0, &a).unwrap();
	proxy.connect(0, a.clone()).unwrap();

	assert_eq!(
		transport.kinds(),
		["signalConnect", "signalDisconnect", "signalConnect"]
	);
}

#[test]
fn test_emit_reaches_handlers_in_order() {
	let (_channel, transport, proxy) = remote_proxy();
	let log = Arc::new(Mutex::new(Vec::new()));
	proxy.connect(0, recorder(&log, "first")).unwrap();
	proxy.connect(0, recorder(&log, "second")).unwrap();

	emit(&transport, vec![json!(1)]);
	emit(&transport, vec![json!(2), json!("two")]);

	assert_eq!(
		*log.lock(),
		[
			("first".to_string(), json!([1])),
			("second".to_string(), json!([1])),
			("first".to_string(), json!([2, "two"])),
			("second".to_string(), json!([2, "two"])),
		]
	);
}

#[test]
fn test_unknown_signal_rejected() {
	let (_channel, transport, proxy) = remote_proxy();
	let handler: SignalHandler = Arc::new(|_, _, _| {});

	assert!(matches!(
		proxy.connect(4, handler),
		Err(Error::UnknownSignal { index: 4, .. })
	));
	assert!(transport.sent().is_empty());
}

#[test]
fn test_disconnected_transport() {
	let (channel, transport, proxy) = remote_proxy();
	let log = Arc::new(Mutex::new(Vec::new()));
	let a = recorder(&log, "a");
	proxy.connect(0, a.clone()).unwrap();

	channel.disconnect_from(&transport).unwrap();

	assert!(proxy.connect(0, a.clone()).unwrap_err().is_connection_closed());
	assert!(proxy.disconnect(0, &a).is_ok());
	assert_eq!(transport.kinds(), ["signalConnect"]);
}

#[test]
fn test_failed_subscribe_is_rolled_back() {
	let (_channel, transport, proxy) = remote_proxy();
	let log = Arc::new(Mutex::new(Vec::new()));
	let a = recorder(&log, "a");

	transport.set_failing(true);
	assert!(matches!(proxy.connect(0, a.clone()), Err(Error::TransportError(_))));
	assert_eq!(proxy.subscriber_count(0), 0);

	transport.set_failing(false);
	proxy.connect(0, a).unwrap();
	assert_eq!(transport.kinds(), ["signalConnect"]);
}
