// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation context and its flattened wire form.
//!
//! Callers and hooks work with the structured [`EvaluationContext`]. Providers
//! receive a [`FlattenedContext`]: a single attribute map in which the
//! targeting key travels under the reserved [`TARGETING_KEY`] entry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Reserved attribute name carrying the targeting key in flattened form.
pub const TARGETING_KEY: &str = "targetingKey";

/// Structured context for a flag evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
	/// Identifier used for targeting. Empty means "not set".
	#[serde(default)]
	pub targeting_key: String,
	#[serde(default)]
	pub attributes: HashMap<String, serde_json::Value>,
}

impl EvaluationContext {
	pub fn new(targeting_key: impl Into<String>) -> Self {
		Self {
			targeting_key: targeting_key.into(),
			attributes: HashMap::new(),
		}
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
		self.attributes.get(key)
	}

	pub fn is_empty(&self) -> bool {
		self.targeting_key.is_empty() && self.attributes.is_empty()
	}

	/// Merges `other` underneath `self`: keys already present in `self` win,
	/// and an empty targeting key is filled from `other`.
	pub fn merge(mut self, other: &EvaluationContext) -> Self {
		if self.targeting_key.is_empty() && !other.targeting_key.is_empty() {
			self.targeting_key = other.targeting_key.clone();
		}
		for (key, value) in &other.attributes {
			self.attributes
				.entry(key.clone())
				.or_insert_with(|| value.clone());
		}
		self
	}

	/// Converts into the provider wire form.
	pub fn flatten(&self) -> FlattenedContext {
		let mut flat = self.attributes.clone();
		if !self.targeting_key.is_empty() {
			flat.insert(
				TARGETING_KEY.to_string(),
				serde_json::Value::String(self.targeting_key.clone()),
			);
		}
		FlattenedContext(flat)
	}
}

/// Flattened provider-facing context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlattenedContext(HashMap<String, serde_json::Value>);

impl FlattenedContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn targeting_key(&self) -> Option<&str> {
		self.0.get(TARGETING_KEY).and_then(|v| v.as_str())
	}

	pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
		self.0.get(key)
	}

	pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
		self.0.insert(key.into(), value);
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn as_map(&self) -> &HashMap<String, serde_json::Value> {
		&self.0
	}

	/// Converts back into the structured form. A non-string value under
	/// [`TARGETING_KEY`] is kept as an ordinary attribute.
	pub fn deepen(&self) -> EvaluationContext {
		let mut attributes = self.0.clone();
		let targeting_key = match attributes.remove(TARGETING_KEY) {
			Some(serde_json::Value::String(key)) => key,
			Some(other) => {
				attributes.insert(TARGETING_KEY.to_string(), other);
				String::new()
			}
			None => String::new(),
		};
		EvaluationContext {
			targeting_key,
			attributes,
		}
	}
}

impl From<HashMap<String, serde_json::Value>> for FlattenedContext {
	fn from(map: HashMap<String, serde_json::Value>) -> Self {
		Self(map)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn flatten_carries_targeting_key() {
		let ctx = EvaluationContext::new("user-1").with_attribute("plan", json!("pro"));
		let flat = ctx.flatten();
		assert_eq!(flat.targeting_key(), Some("user-1"));
		assert_eq!(flat.get("plan"), Some(&json!("pro")));
		assert_eq!(flat.len(), 2);
	}

	#[test]
	fn flatten_omits_empty_targeting_key() {
		let flat = EvaluationContext::default()
			.with_attribute("region", json!("eu"))
			.flatten();
		assert_eq!(flat.targeting_key(), None);
		assert_eq!(flat.len(), 1);
	}

	#[test]
	fn deepen_restores_structure() {
		let ctx = EvaluationContext::new("user-2").with_attribute("age", json!(42));
		assert_eq!(ctx.flatten().deepen(), ctx);
	}

	#[test]
	fn deepen_keeps_non_string_targeting_key_as_attribute() {
		let mut flat = FlattenedContext::new();
		flat.insert(TARGETING_KEY, json!(17));
		let ctx = flat.deepen();
		assert!(ctx.targeting_key.is_empty());
		assert_eq!(ctx.attribute(TARGETING_KEY), Some(&json!(17)));
	}

	#[test]
	fn merge_is_first_writer_wins() {
		let first = EvaluationContext::default().with_attribute("plan", json!("pro"));
		let second = EvaluationContext::new("user-3")
			.with_attribute("plan", json!("free"))
			.with_attribute("region", json!("us"));

		let merged = first.merge(&second);
		assert_eq!(merged.targeting_key, "user-3");
		assert_eq!(merged.attribute("plan"), Some(&json!("pro")));
		assert_eq!(merged.attribute("region"), Some(&json!("us")));
	}

	#[test]
	fn merge_keeps_existing_targeting_key() {
		let merged = EvaluationContext::new("a").merge(&EvaluationContext::new("b"));
		assert_eq!(merged.targeting_key, "a");
	}
}
