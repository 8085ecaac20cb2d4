// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provider state-change events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::resolution::{FlagMetadata, MetadataValue};

/// Kind of provider event.
///
/// `ConfigChange` is an event tag only; it never becomes a provider state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderEventType {
	Ready,
	Stale,
	Error,
	ConfigChange,
}

/// An event emitted by a provider's event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
	pub provider_name: String,
	pub event_type: ProviderEventType,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_code: Option<ErrorCode>,
	/// Flag keys affected by a `ConfigChange`.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub flags_changed: Vec<String>,
	#[serde(default)]
	pub metadata: FlagMetadata,
	pub timestamp: DateTime<Utc>,
}

impl ProviderEvent {
	pub fn new(provider_name: impl Into<String>, event_type: ProviderEventType) -> Self {
		Self {
			provider_name: provider_name.into(),
			event_type,
			message: None,
			error_code: None,
			flags_changed: Vec::new(),
			metadata: FlagMetadata::new(),
			timestamp: Utc::now(),
		}
	}

	pub fn ready(provider_name: impl Into<String>) -> Self {
		Self::new(provider_name, ProviderEventType::Ready)
	}

	pub fn stale(provider_name: impl Into<String>) -> Self {
		Self::new(provider_name, ProviderEventType::Stale)
	}

	pub fn error(
		provider_name: impl Into<String>,
		code: ErrorCode,
		message: impl Into<String>,
	) -> Self {
		let mut event = Self::new(provider_name, ProviderEventType::Error);
		event.error_code = Some(code);
		event.message = Some(message.into());
		event
	}

	pub fn config_change(provider_name: impl Into<String>, flags_changed: Vec<String>) -> Self {
		let mut event = Self::new(provider_name, ProviderEventType::ConfigChange);
		event.flags_changed = flags_changed;
		event
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self
	}

	pub fn with_metadata(
		mut self,
		key: impl Into<String>,
		value: impl Into<MetadataValue>,
	) -> Self {
		self.metadata.insert(key, value);
		self
	}
}
