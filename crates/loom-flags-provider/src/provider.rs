// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The provider capability contract.
//!
//! A provider is a base evaluation interface ([`FeatureProvider`]) plus
//! orthogonal optional capabilities: [`Lifecycle`], [`EventSource`] and
//! [`Tracker`]. Optional capabilities are exposed through accessor methods that
//! return `None` by default, so callers can detect them once when a provider is
//! registered instead of probing on every call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::context::{EvaluationContext, FlattenedContext};
use crate::error::{ProviderError, ResolutionError};
use crate::event::ProviderEvent;
use crate::hook::Hook;
use crate::resolution::ResolutionDetail;
use crate::value::{FlagKind, FlagType, FlagValue};

/// Descriptive metadata about a provider implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
	pub name: String,
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub attributes: HashMap<String, String>,
}

impl ProviderMetadata {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			attributes: HashMap::new(),
		}
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.attributes.insert(key.into(), value.into());
		self
	}
}

/// Health of a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderState {
	#[default]
	NotReady,
	Ready,
	Stale,
	Error,
}

impl fmt::Display for ProviderState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ProviderState::NotReady => "NOT_READY",
			ProviderState::Ready => "READY",
			ProviderState::Stale => "STALE",
			ProviderState::Error => "ERROR",
		};
		f.write_str(name)
	}
}

/// Typed flag evaluation.
#[async_trait]
pub trait FeatureProvider: Send + Sync + 'static {
	fn metadata(&self) -> ProviderMetadata;

	/// Hooks the provider wants run around each of its evaluations.
	fn hooks(&self) -> Vec<Arc<dyn Hook>> {
		Vec::new()
	}

	async fn resolve_bool(
		&self,
		flag_key: &str,
		default: bool,
		context: &FlattenedContext,
	) -> ResolutionDetail<bool>;

	async fn resolve_string(
		&self,
		flag_key: &str,
		default: String,
		context: &FlattenedContext,
	) -> ResolutionDetail<String>;

	async fn resolve_int(
		&self,
		flag_key: &str,
		default: i64,
		context: &FlattenedContext,
	) -> ResolutionDetail<i64>;

	async fn resolve_float(
		&self,
		flag_key: &str,
		default: f64,
		context: &FlattenedContext,
	) -> ResolutionDetail<f64>;

	async fn resolve_object(
		&self,
		flag_key: &str,
		default: serde_json::Value,
		context: &FlattenedContext,
	) -> ResolutionDetail<serde_json::Value>;

	fn lifecycle(&self) -> Option<&dyn Lifecycle> {
		None
	}

	fn events(&self) -> Option<&dyn EventSource> {
		None
	}

	fn tracker(&self) -> Option<&dyn Tracker> {
		None
	}
}

/// Optional init/shutdown/status capability.
#[async_trait]
pub trait Lifecycle: Send + Sync {
	async fn init(&self, context: &EvaluationContext) -> Result<(), ProviderError>;

	/// Releases provider resources. Never fails.
	async fn shutdown(&self);

	fn status(&self) -> ProviderState;
}

/// Optional event stream capability.
pub trait EventSource: Send + Sync {
	/// Returns a new receiver on the provider's event stream.
	fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// Extra data attached to a tracking event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingEventDetails {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub value: Option<f64>,
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub attributes: HashMap<String, serde_json::Value>,
}

impl TrackingEventDetails {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_value(mut self, value: f64) -> Self {
		self.value = Some(value);
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}
}

/// Optional capability for recording user actions tied to flag exposure.
pub trait Tracker: Send + Sync {
	fn track(&self, event_name: &str, context: &FlattenedContext, details: &TrackingEventDetails);
}

/// Dispatches an untyped evaluation to the provider's typed method that
/// matches the default value's kind.
pub async fn resolve_value(
	provider: &dyn FeatureProvider,
	flag_key: &str,
	default: FlagValue,
	context: &FlattenedContext,
) -> ResolutionDetail<FlagValue> {
	match default {
		FlagValue::Bool(d) => provider
			.resolve_bool(flag_key, d, context)
			.await
			.map(FlagValue::Bool),
		FlagValue::String(d) => provider
			.resolve_string(flag_key, d, context)
			.await
			.map(FlagValue::String),
		FlagValue::Int(d) => provider
			.resolve_int(flag_key, d, context)
			.await
			.map(FlagValue::Int),
		FlagValue::Float(d) => provider
			.resolve_float(flag_key, d, context)
			.await
			.map(FlagValue::Float),
		FlagValue::Object(d) => provider
			.resolve_object(flag_key, d, context)
			.await
			.map(FlagValue::Object),
	}
}

/// Narrows an untyped resolution back to `T`, degrading to `default` with a
/// `TYPE_MISMATCH` error if the value has the wrong kind.
pub fn into_typed<T: FlagKind>(
	detail: ResolutionDetail<FlagValue>,
	default: T,
) -> ResolutionDetail<T> {
	match T::from_flag_value(detail.value().clone()) {
		Some(value) => detail.map(|_| value),
		None => {
			let actual: FlagType = detail.value().flag_type();
			ResolutionDetail::from_error(
				default,
				ResolutionError::type_mismatch(format!(
					"expected {} value, got {actual}",
					T::FLAG_TYPE
				)),
			)
			.with_metadata(detail.metadata().clone())
		}
	}
}
