// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event forwarding from constituent providers to one outbound stream.
//!
//! One forwarding task per distinct event-emitting capability tags each event
//! with the handle names bound to it and pushes it onto a bounded inbound
//! queue. A single dispatcher drains the queue, drives the
//! [`StateAggregator`], and publishes on the outbound broadcast channel:
//! state events only when the aggregate moves, `ConfigChange` verbatim.
//!
//! Outbound delivery is best effort. A slow subscriber lags and loses events
//! instead of blocking the dispatcher.

use std::sync::Arc;

use loom_flags_provider::{ProviderEvent, ProviderEventType, ProviderState};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument, Span};

use crate::metadata::{PROVIDER_NAME, PROVIDER_TYPE};
use crate::state::{StateAggregator, StateChange};

/// A capability's event stream and the handle names it feeds.
pub struct EventBinding {
	pub names: Vec<String>,
	pub provider_type: String,
	pub receiver: broadcast::Receiver<ProviderEvent>,
}

struct Forwarded {
	names: Vec<String>,
	provider_type: String,
	event: ProviderEvent,
}

pub struct EventForwarder {
	source: String,
	aggregator: Arc<StateAggregator>,
	cancel: CancellationToken,
	inbound: parking_lot::Mutex<Option<mpsc::Sender<Forwarded>>>,
	inbound_rx: parking_lot::Mutex<Option<mpsc::Receiver<Forwarded>>>,
	outbound: parking_lot::Mutex<Option<broadcast::Sender<ProviderEvent>>>,
	handles: Mutex<Vec<JoinHandle<()>>>,
	dispatcher: Mutex<Option<JoinHandle<()>>>,
	span: Span,
}

impl EventForwarder {
	/// `source` is the provider name stamped on outbound events. `capacity`
	/// bounds both the inbound queue and the outbound channel.
	pub fn new(
		source: impl Into<String>,
		aggregator: Arc<StateAggregator>,
		capacity: usize,
		span: Span,
	) -> Self {
		let capacity = capacity.max(1);
		let (inbound, inbound_rx) = mpsc::channel(capacity);
		let (outbound, _) = broadcast::channel(capacity);
		Self {
			source: source.into(),
			aggregator,
			cancel: CancellationToken::new(),
			inbound: parking_lot::Mutex::new(Some(inbound)),
			inbound_rx: parking_lot::Mutex::new(Some(inbound_rx)),
			outbound: parking_lot::Mutex::new(Some(outbound)),
			handles: Mutex::new(Vec::new()),
			dispatcher: Mutex::new(None),
			span,
		}
	}

	/// Spawns the dispatcher and one forwarder per binding. Later calls are
	/// no-ops.
	pub async fn start(&self, bindings: Vec<EventBinding>) {
		let Some(inbound_rx) = self.inbound_rx.lock().take() else {
			debug!("event forwarding already started");
			return;
		};
		let outbound = self.outbound.lock().clone();
		let inbound = self.inbound.lock().clone();
		let (Some(outbound), Some(inbound)) = (outbound, inbound) else {
			return;
		};

		let dispatcher = tokio::spawn(
			dispatch(
				inbound_rx,
				Arc::clone(&self.aggregator),
				outbound,
				self.source.clone(),
			)
			.instrument(self.span.clone()),
		);
		*self.dispatcher.lock().await = Some(dispatcher);

		let mut handles = self.handles.lock().await;
		for binding in bindings {
			let task = forward(binding, inbound.clone(), self.cancel.clone());
			let handle = tokio::spawn(task.instrument(self.span.clone()));
			handles.push(handle);
		}

		info!(sources = handles.len(), "event forwarding started");
	}

	/// Stops forwarders and the dispatcher and waits for them to exit. The
	/// outbound stream stays open until [`EventForwarder::close`].
	#[instrument(skip(self), fields(source = %self.source))]
	pub async fn stop(&self) {
		self.cancel.cancel();
		drop(self.inbound.lock().take());

		let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
		for handle in handles {
			let _ = handle.await;
		}

		if let Some(dispatcher) = self.dispatcher.lock().await.take() {
			let _ = dispatcher.await;
		}
		drop(self.inbound_rx.lock().take());

		debug!("event forwarding stopped");
	}

	/// Closes the outbound stream; subscribers observe end of stream.
	pub fn close(&self) {
		drop(self.outbound.lock().take());
	}

	/// Publishes directly on the outbound stream.
	pub fn publish(&self, event: ProviderEvent) {
		if let Some(outbound) = self.outbound.lock().as_ref() {
			// No subscribers is fine.
			let _ = outbound.send(event);
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
		match self.outbound.lock().as_ref() {
			Some(outbound) => outbound.subscribe(),
			None => {
				let (closed, receiver) = broadcast::channel(1);
				drop(closed);
				receiver
			}
		}
	}
}

async fn forward(
	binding: EventBinding,
	inbound: mpsc::Sender<Forwarded>,
	cancel: CancellationToken,
) {
	let EventBinding {
		names,
		provider_type,
		mut receiver,
	} = binding;

	loop {
		let received = tokio::select! {
			_ = cancel.cancelled() => break,
			received = receiver.recv() => received,
		};

		let event = match received {
			Ok(event) => event,
			Err(RecvError::Lagged(skipped)) => {
				warn!(providers = ?names, skipped, "provider event stream lagged");
				continue;
			}
			Err(RecvError::Closed) => {
				debug!(providers = ?names, "provider event stream closed");
				break;
			}
		};

		let forwarded = Forwarded {
			names: names.clone(),
			provider_type: provider_type.clone(),
			event,
		};
		tokio::select! {
			_ = cancel.cancelled() => break,
			sent = inbound.send(forwarded) => {
				if sent.is_err() {
					break;
				}
			}
		}
	}
}

async fn dispatch(
	mut inbound: mpsc::Receiver<Forwarded>,
	aggregator: Arc<StateAggregator>,
	outbound: broadcast::Sender<ProviderEvent>,
	source: String,
) {
	while let Some(Forwarded {
		names,
		provider_type,
		event,
	}) = inbound.recv().await
	{
		let origin = names.join(",");
		let Some(state) = aggregator.table().state_for(event.event_type) else {
			aggregator.apply(&event);
			let mut out = event;
			out.provider_name = source.clone();
			out.metadata.insert(PROVIDER_NAME, origin);
			out.metadata.insert(PROVIDER_TYPE, provider_type);
			let _ = outbound.send(out);
			continue;
		};

		let change = aggregator.set_many(names.iter().map(|name| (name.clone(), state)));
		let republished = change.and_then(|change| {
			aggregate_event(&source, change, &origin, &provider_type, Some(&event))
		});
		match republished {
			Some(out) => {
				debug!(provider = %origin, state = %state, "republishing aggregate state");
				let _ = outbound.send(out);
			}
			None => debug!(provider = %origin, state = %state, "aggregate unchanged"),
		}
	}
	debug!("event dispatcher stopped");
}

/// Builds the outbound event announcing an aggregate move. `NotReady` has no
/// event type and yields `None`.
pub(crate) fn aggregate_event(
	source: &str,
	change: StateChange,
	provider_name: &str,
	provider_type: &str,
	cause: Option<&ProviderEvent>,
) -> Option<ProviderEvent> {
	let event_type = match change.current {
		ProviderState::Ready => ProviderEventType::Ready,
		ProviderState::Stale => ProviderEventType::Stale,
		ProviderState::Error => ProviderEventType::Error,
		ProviderState::NotReady => return None,
	};
	let mut event = ProviderEvent::new(source, event_type)
		.with_metadata(PROVIDER_NAME, provider_name)
		.with_metadata(PROVIDER_TYPE, provider_type);
	if let Some(cause) = cause {
		event.message = cause.message.clone();
		event.error_code = cause.error_code;
	}
	Some(event)
}

#[cfg(test)]
mod tests {
	use super::*;
	use loom_flags_provider::{EventSource, InMemoryProvider};
	use std::time::Duration;

	async fn next(rx: &mut broadcast::Receiver<ProviderEvent>) -> ProviderEvent {
		tokio::time::timeout(Duration::from_secs(1), rx.recv())
			.await
			.expect("event within a second")
			.expect("open stream")
	}

	fn binding(name: &str, provider: &InMemoryProvider) -> EventBinding {
		EventBinding {
			names: vec![name.to_string()],
			provider_type: "InMemoryProvider".to_string(),
			receiver: provider.subscribe(),
		}
	}

	fn forwarder(names: &[&str]) -> (Arc<StateAggregator>, EventForwarder) {
		let aggregator = Arc::new(StateAggregator::new(names.iter().map(|n| n.to_string())));
		let forwarder =
			EventForwarder::new("MultiProvider", Arc::clone(&aggregator), 16, Span::none());
		(aggregator, forwarder)
	}

	#[tokio::test]
	async fn republishes_only_aggregate_changes() {
		let a = InMemoryProvider::new("a");
		let b = InMemoryProvider::new("b");
		let (aggregator, forwarder) = forwarder(&["a", "b"]);
		let mut out = forwarder.subscribe();
		forwarder.start(vec![binding("a", &a), binding("b", &b)]).await;

		a.emit(ProviderEvent::ready("a"));
		let first = next(&mut out).await;
		assert_eq!(first.event_type, ProviderEventType::Ready);
		assert_eq!(first.provider_name, "MultiProvider");
		assert_eq!(first.metadata.get_str(PROVIDER_NAME), Some("a"));

		// b becoming ready does not move the aggregate.
		b.emit(ProviderEvent::ready("b"));
		b.emit(ProviderEvent::error("b", loom_flags_provider::ErrorCode::ProviderFatal, "down"));
		let second = next(&mut out).await;
		assert_eq!(second.event_type, ProviderEventType::Error);
		assert_eq!(second.message.as_deref(), Some("down"));
		assert_eq!(aggregator.aggregate(), ProviderState::Error);

		forwarder.stop().await;
		forwarder.close();
	}

	#[tokio::test]
	async fn config_change_is_forwarded_verbatim() {
		let a = InMemoryProvider::new("a");
		let (_, forwarder) = forwarder(&["a"]);
		let mut out = forwarder.subscribe();
		forwarder.start(vec![binding("a", &a)]).await;

		a.emit(ProviderEvent::config_change("a", vec!["checkout".to_string()]));
		let event = next(&mut out).await;
		assert_eq!(event.event_type, ProviderEventType::ConfigChange);
		assert_eq!(event.flags_changed, vec!["checkout".to_string()]);
		assert_eq!(event.metadata.get_str(PROVIDER_TYPE), Some("InMemoryProvider"));

		forwarder.stop().await;
		forwarder.close();
	}

	#[tokio::test]
	async fn shared_binding_updates_every_name() {
		let shared = InMemoryProvider::new("shared");
		let (aggregator, forwarder) = forwarder(&["x", "y"]);
		let mut out = forwarder.subscribe();
		forwarder
			.start(vec![EventBinding {
				names: vec!["x".to_string(), "y".to_string()],
				provider_type: "InMemoryProvider".to_string(),
				receiver: shared.subscribe(),
			}])
			.await;

		shared.emit(ProviderEvent::stale("shared"));
		let event = next(&mut out).await;
		assert_eq!(event.metadata.get_str(PROVIDER_NAME), Some("x,y"));
		assert_eq!(aggregator.state_of("x"), Some(ProviderState::Stale));
		assert_eq!(aggregator.state_of("y"), Some(ProviderState::Stale));

		forwarder.stop().await;
		forwarder.close();
	}

	#[tokio::test]
	async fn close_ends_outbound_stream() {
		let (_, forwarder) = forwarder(&["a"]);
		let mut out = forwarder.subscribe();
		forwarder.start(Vec::new()).await;
		forwarder.stop().await;
		forwarder.close();

		assert!(matches!(out.recv().await, Err(RecvError::Closed)));
		assert!(matches!(forwarder.subscribe().recv().await, Err(RecvError::Closed)));
	}

	#[test]
	fn not_ready_has_no_outbound_event() {
		let change = StateChange {
			previous: ProviderState::Ready,
			current: ProviderState::NotReady,
		};
		assert!(aggregate_event("m", change, "a", "t", None).is_none());
	}
}
