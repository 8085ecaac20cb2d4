// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The resolution envelope returned by every evaluation.
//!
//! A [`ResolutionDetail`] carries the resolved value together with the variant,
//! the [`Reason`] that explains it, an optional [`ResolutionError`], and open
//! [`FlagMetadata`]. The reason and the error are kept private so that an error
//! is present exactly when the reason is [`Reason::Error`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ResolutionError};

/// Why a resolution has the value it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
	Default,
	TargetingMatch,
	Split,
	Disabled,
	Static,
	Cached,
	Unknown,
	Error,
	/// Several providers agreed on the value.
	Aggregated,
	/// Providers disagreed and the fallback provider decided.
	AggregatedFallback,
}

impl Reason {
	pub fn as_str(&self) -> &'static str {
		match self {
			Reason::Default => "DEFAULT",
			Reason::TargetingMatch => "TARGETING_MATCH",
			Reason::Split => "SPLIT",
			Reason::Disabled => "DISABLED",
			Reason::Static => "STATIC",
			Reason::Cached => "CACHED",
			Reason::Unknown => "UNKNOWN",
			Reason::Error => "ERROR",
			Reason::Aggregated => "AGGREGATED",
			Reason::AggregatedFallback => "AGGREGATED_FALLBACK",
		}
	}
}

impl fmt::Display for Reason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single flag metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
	Bool(bool),
	Int(i64),
	Float(f64),
	String(String),
}

impl From<bool> for MetadataValue {
	fn from(value: bool) -> Self {
		MetadataValue::Bool(value)
	}
}

impl From<i64> for MetadataValue {
	fn from(value: i64) -> Self {
		MetadataValue::Int(value)
	}
}

impl From<f64> for MetadataValue {
	fn from(value: f64) -> Self {
		MetadataValue::Float(value)
	}
}

impl From<String> for MetadataValue {
	fn from(value: String) -> Self {
		MetadataValue::String(value)
	}
}

impl From<&str> for MetadataValue {
	fn from(value: &str) -> Self {
		MetadataValue::String(value.to_string())
	}
}

/// Open attribution map attached to a resolution or an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagMetadata(HashMap<String, MetadataValue>);

impl FlagMetadata {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
		self.insert(key, value);
		self
	}

	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
		self.0.insert(key.into(), value.into());
	}

	pub fn get(&self, key: &str) -> Option<&MetadataValue> {
		self.0.get(key)
	}

	pub fn get_str(&self, key: &str) -> Option<&str> {
		match self.0.get(key) {
			Some(MetadataValue::String(s)) => Some(s),
			_ => None,
		}
	}

	pub fn get_bool(&self, key: &str) -> Option<bool> {
		match self.0.get(key) {
			Some(MetadataValue::Bool(b)) => Some(*b),
			_ => None,
		}
	}

	/// Copies every entry of `other` into `self`, overwriting existing keys.
	pub fn extend(&mut self, other: FlagMetadata) {
		self.0.extend(other.0);
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
		self.0.iter()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

/// Result of resolving one flag against one provider (or a set of them).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionDetail<T> {
	value: T,
	variant: Option<String>,
	reason: Reason,
	error: Option<ResolutionError>,
	metadata: FlagMetadata,
}

impl<T> ResolutionDetail<T> {
	/// Creates a successful resolution.
	///
	/// Passing [`Reason::Error`] here is coerced into a `GENERAL` error so the
	/// reason and the error never disagree; use [`ResolutionDetail::from_error`] to
	/// report a specific failure.
	pub fn new(value: T, reason: Reason) -> Self {
		let error = (reason == Reason::Error)
			.then(|| ResolutionError::general("resolution reported ERROR without error details"));
		Self {
			value,
			variant: None,
			reason,
			error,
			metadata: FlagMetadata::new(),
		}
	}

	/// Creates an errored resolution carrying the caller's default value.
	pub fn from_error(default: T, error: ResolutionError) -> Self {
		Self {
			value: default,
			variant: None,
			reason: Reason::Error,
			error: Some(error),
			metadata: FlagMetadata::new(),
		}
	}

	pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
		self.variant = Some(variant.into());
		self
	}

	pub fn with_metadata(mut self, metadata: FlagMetadata) -> Self {
		self.metadata.extend(metadata);
		self
	}

	pub fn with_metadata_entry(
		mut self,
		key: impl Into<String>,
		value: impl Into<MetadataValue>,
	) -> Self {
		self.metadata.insert(key, value);
		self
	}

	pub fn value(&self) -> &T {
		&self.value
	}

	pub fn into_value(self) -> T {
		self.value
	}

	pub fn variant(&self) -> Option<&str> {
		self.variant.as_deref()
	}

	pub fn reason(&self) -> Reason {
		self.reason
	}

	pub fn error(&self) -> Option<&ResolutionError> {
		self.error.as_ref()
	}

	pub fn error_code(&self) -> Option<ErrorCode> {
		self.error.as_ref().map(|e| e.code)
	}

	pub fn metadata(&self) -> &FlagMetadata {
		&self.metadata
	}

	pub fn is_error(&self) -> bool {
		self.error.is_some()
	}

	/// Converts the value while keeping every other field.
	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResolutionDetail<U> {
		ResolutionDetail {
			value: f(self.value),
			variant: self.variant,
			reason: self.reason,
			error: self.error,
			metadata: self.metadata,
		}
	}
}
