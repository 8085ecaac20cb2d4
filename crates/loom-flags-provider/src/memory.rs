// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Map-backed provider for tests, demos, and local overrides.
//!
//! Flags are plain variant tables; there is no targeting. The provider
//! implements every optional capability so it can stand in for a real backend
//! when exercising lifecycle and event handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::context::{EvaluationContext, FlattenedContext};
use crate::error::{ErrorCode, ProviderError, ResolutionError};
use crate::event::{ProviderEvent, ProviderEventType};
use crate::provider::{
	EventSource, FeatureProvider, Lifecycle, ProviderMetadata, ProviderState, Tracker,
	TrackingEventDetails,
};
use crate::resolution::{ResolutionDetail, Reason};
use crate::value::{FlagKind, FlagValue};

const EVENT_CAPACITY: usize = 32;

/// A flag definition held by [`InMemoryProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryFlag {
	pub variants: HashMap<String, FlagValue>,
	pub default_variant: String,
	pub disabled: bool,
}

impl InMemoryFlag {
	pub fn new(default_variant: impl Into<String>, variants: HashMap<String, FlagValue>) -> Self {
		Self {
			variants,
			default_variant: default_variant.into(),
			disabled: false,
		}
	}

	/// A flag with a single variant.
	pub fn constant(variant: impl Into<String>, value: FlagValue) -> Self {
		let variant = variant.into();
		let mut variants = HashMap::new();
		variants.insert(variant.clone(), value);
		Self::new(variant, variants)
	}

	pub fn disabled(mut self) -> Self {
		self.disabled = true;
		self
	}
}

/// In-memory [`FeatureProvider`].
pub struct InMemoryProvider {
	name: String,
	flags: RwLock<HashMap<String, InMemoryFlag>>,
	state: RwLock<ProviderState>,
	init_error: Option<ProviderError>,
	events: broadcast::Sender<ProviderEvent>,
	tracked: AtomicUsize,
}

impl InMemoryProvider {
	pub fn new(name: impl Into<String>) -> Self {
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		Self {
			name: name.into(),
			flags: RwLock::new(HashMap::new()),
			state: RwLock::new(ProviderState::NotReady),
			init_error: None,
			events,
			tracked: AtomicUsize::new(0),
		}
	}

	pub fn with_flag(self, key: impl Into<String>, flag: InMemoryFlag) -> Self {
		self.flags.write().insert(key.into(), flag);
		self
	}

	/// Makes `init` fail with `error`, leaving the provider in `Error`.
	pub fn with_init_error(mut self, error: ProviderError) -> Self {
		self.init_error = Some(error);
		self
	}

	/// Replaces (or adds) a flag and announces a `ConfigChange`.
	pub fn set_flag(&self, key: impl Into<String>, flag: InMemoryFlag) {
		let key = key.into();
		self.flags.write().insert(key.clone(), flag);
		self.publish(ProviderEvent::config_change(&self.name, vec![key]));
	}

	pub fn remove_flag(&self, key: &str) -> Option<InMemoryFlag> {
		let removed = self.flags.write().remove(key);
		if removed.is_some() {
			self.publish(ProviderEvent::config_change(&self.name, vec![key.to_string()]));
		}
		removed
	}

	/// Moves the provider to `state` and emits the matching event.
	pub fn set_state(&self, state: ProviderState) {
		*self.state.write() = state;
		let event_type = match state {
			ProviderState::Ready => ProviderEventType::Ready,
			ProviderState::Stale => ProviderEventType::Stale,
			ProviderState::Error => ProviderEventType::Error,
			ProviderState::NotReady => return,
		};
		self.publish(ProviderEvent::new(&self.name, event_type));
	}

	/// Emits an arbitrary event without touching the stored state.
	pub fn emit(&self, event: ProviderEvent) {
		self.publish(event);
	}

	/// Number of tracking events received.
	pub fn tracked_events(&self) -> usize {
		self.tracked.load(Ordering::SeqCst)
	}

	fn publish(&self, event: ProviderEvent) {
		// No subscribers is fine.
		let _ = self.events.send(event);
	}

	fn resolve<T: FlagKind>(&self, flag_key: &str, default: T) -> ResolutionDetail<T> {
		let flags = self.flags.read();
		let Some(flag) = flags.get(flag_key) else {
			return ResolutionDetail::from_error(default, ResolutionError::flag_not_found(flag_key));
		};

		if flag.disabled {
			return ResolutionDetail::new(default, Reason::Disabled);
		}

		let Some(value) = flag.variants.get(&flag.default_variant) else {
			return ResolutionDetail::from_error(
				default,
				ResolutionError::new(
					ErrorCode::ParseError,
					format!("default variant '{}' is not defined", flag.default_variant),
				),
			);
		};

		match T::from_flag_value(value.clone()) {
			Some(v) => {
				ResolutionDetail::new(v, Reason::Static).with_variant(flag.default_variant.clone())
			}
			None => ResolutionDetail::from_error(
				default,
				ResolutionError::type_mismatch(format!(
					"flag '{flag_key}' is {}, requested {}",
					value.flag_type(),
					T::FLAG_TYPE
				)),
			),
		}
	}
}

#[async_trait]
impl FeatureProvider for InMemoryProvider {
	fn metadata(&self) -> ProviderMetadata {
		ProviderMetadata::new("InMemoryProvider").with_attribute("name", self.name.clone())
	}

	async fn resolve_bool(
		&self,
		flag_key: &str,
		default: bool,
		_context: &FlattenedContext,
	) -> ResolutionDetail<bool> {
		self.resolve(flag_key, default)
	}

	async fn resolve_string(
		&self,
		flag_key: &str,
		default: String,
		_context: &FlattenedContext,
	) -> ResolutionDetail<String> {
		self.resolve(flag_key, default)
	}

	async fn resolve_int(
		&self,
		flag_key: &str,
		default: i64,
		_context: &FlattenedContext,
	) -> ResolutionDetail<i64> {
		self.resolve(flag_key, default)
	}

	async fn resolve_float(
		&self,
		flag_key: &str,
		default: f64,
		_context: &FlattenedContext,
	) -> ResolutionDetail<f64> {
		self.resolve(flag_key, default)
	}

	async fn resolve_object(
		&self,
		flag_key: &str,
		default: serde_json::Value,
		_context: &FlattenedContext,
	) -> ResolutionDetail<serde_json::Value> {
		self.resolve(flag_key, default)
	}

	fn lifecycle(&self) -> Option<&dyn Lifecycle> {
		Some(self)
	}

	fn events(&self) -> Option<&dyn EventSource> {
		Some(self)
	}

	fn tracker(&self) -> Option<&dyn Tracker> {
		Some(self)
	}
}

#[async_trait]
impl Lifecycle for InMemoryProvider {
	async fn init(&self, _context: &EvaluationContext) -> Result<(), ProviderError> {
		if let Some(err) = &self.init_error {
			*self.state.write() = ProviderState::Error;
			self.publish(ProviderEvent::error(&self.name, err.code(), err.to_string()));
			return Err(err.clone());
		}
		debug!(
			provider = %self.name,
			flags = self.flags.read().len(),
			"in-memory provider initialized"
		);
		self.set_state(ProviderState::Ready);
		Ok(())
	}

	async fn shutdown(&self) {
		*self.state.write() = ProviderState::NotReady;
	}

	fn status(&self) -> ProviderState {
		*self.state.read()
	}
}

impl EventSource for InMemoryProvider {
	fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
		self.events.subscribe()
	}
}

impl Tracker for InMemoryProvider {
	fn track(
		&self,
		event_name: &str,
		_context: &FlattenedContext,
		_details: &TrackingEventDetails,
	) {
		debug!(provider = %self.name, event_name, "tracking event recorded");
		self.tracked.fetch_add(1, Ordering::SeqCst);
	}
}
