// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed flag values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of value a flag evaluation asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
	Bool,
	String,
	Int,
	Float,
	Object,
}

impl fmt::Display for FlagType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			FlagType::Bool => "bool",
			FlagType::String => "string",
			FlagType::Int => "int",
			FlagType::Float => "float",
			FlagType::Object => "object",
		};
		f.write_str(name)
	}
}

/// A flag value of any supported kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FlagValue {
	Bool(bool),
	String(String),
	Int(i64),
	Float(f64),
	Object(serde_json::Value),
}

impl FlagValue {
	pub fn flag_type(&self) -> FlagType {
		match self {
			FlagValue::Bool(_) => FlagType::Bool,
			FlagValue::String(_) => FlagType::String,
			FlagValue::Int(_) => FlagType::Int,
			FlagValue::Float(_) => FlagType::Float,
			FlagValue::Object(_) => FlagType::Object,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			FlagValue::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			FlagValue::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_int(&self) -> Option<i64> {
		match self {
			FlagValue::Int(i) => Some(*i),
			_ => None,
		}
	}

	pub fn as_float(&self) -> Option<f64> {
		match self {
			FlagValue::Float(f) => Some(*f),
			_ => None,
		}
	}

	pub fn as_object(&self) -> Option<&serde_json::Value> {
		match self {
			FlagValue::Object(v) => Some(v),
			_ => None,
		}
	}
}

impl fmt::Display for FlagValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FlagValue::Bool(b) => write!(f, "{b}"),
			FlagValue::String(s) => f.write_str(s),
			FlagValue::Int(i) => write!(f, "{i}"),
			FlagValue::Float(v) => write!(f, "{v}"),
			FlagValue::Object(v) => write!(f, "{v}"),
		}
	}
}

/// Native Rust types that can be evaluated as a flag.
pub trait FlagKind: Clone + Send + Sync + 'static {
	const FLAG_TYPE: FlagType;

	fn into_flag_value(self) -> FlagValue;

	fn from_flag_value(value: FlagValue) -> Option<Self>;
}

impl FlagKind for bool {
	const FLAG_TYPE: FlagType = FlagType::Bool;

	fn into_flag_value(self) -> FlagValue {
		FlagValue::Bool(self)
	}

	fn from_flag_value(value: FlagValue) -> Option<Self> {
		value.as_bool()
	}
}

impl FlagKind for String {
	const FLAG_TYPE: FlagType = FlagType::String;

	fn into_flag_value(self) -> FlagValue {
		FlagValue::String(self)
	}

	fn from_flag_value(value: FlagValue) -> Option<Self> {
		match value {
			FlagValue::String(s) => Some(s),
			_ => None,
		}
	}
}

impl FlagKind for i64 {
	const FLAG_TYPE: FlagType = FlagType::Int;

	fn into_flag_value(self) -> FlagValue {
		FlagValue::Int(self)
	}

	fn from_flag_value(value: FlagValue) -> Option<Self> {
		value.as_int()
	}
}

impl FlagKind for f64 {
	const FLAG_TYPE: FlagType = FlagType::Float;

	fn into_flag_value(self) -> FlagValue {
		FlagValue::Float(self)
	}

	fn from_flag_value(value: FlagValue) -> Option<Self> {
		value.as_float()
	}
}

impl FlagKind for serde_json::Value {
	const FLAG_TYPE: FlagType = FlagType::Object;

	fn into_flag_value(self) -> FlagValue {
		FlagValue::Object(self)
	}

	fn from_flag_value(value: FlagValue) -> Option<Self> {
		match value {
			FlagValue::Object(v) => Some(v),
			_ => None,
		}
	}
}
