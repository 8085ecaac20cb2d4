// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types shared by providers, hooks, and resolutions.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for provider lifecycle operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Machine-readable error code carried by an errored resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// The provider has no definition for the flag. Strategies treat this as
	/// an abstention rather than a failure.
	FlagNotFound,
	/// The flag exists but its value has a different type than requested.
	TypeMismatch,
	/// The flag definition could not be parsed.
	ParseError,
	/// The provider requires a targeting key and none was supplied.
	TargetingKeyMissing,
	/// The provider has not finished initializing.
	ProviderNotReady,
	/// The provider is in an unrecoverable state.
	ProviderFatal,
	/// Anything else.
	General,
}

impl ErrorCode {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorCode::FlagNotFound => "FLAG_NOT_FOUND",
			ErrorCode::TypeMismatch => "TYPE_MISMATCH",
			ErrorCode::ParseError => "PARSE_ERROR",
			ErrorCode::TargetingKeyMissing => "TARGETING_KEY_MISSING",
			ErrorCode::ProviderNotReady => "PROVIDER_NOT_READY",
			ErrorCode::ProviderFatal => "PROVIDER_FATAL",
			ErrorCode::General => "GENERAL",
		}
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Error attached to a resolution whose reason is `ERROR`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ResolutionError {
	pub code: ErrorCode,
	pub message: String,
}

impl ResolutionError {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}

	pub fn flag_not_found(flag_key: &str) -> Self {
		Self::new(ErrorCode::FlagNotFound, format!("flag not found: {flag_key}"))
	}

	pub fn type_mismatch(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::TypeMismatch, message)
	}

	pub fn general(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::General, message)
	}

	/// Returns true if this error is an abstention signal.
	pub fn is_not_found(&self) -> bool {
		self.code == ErrorCode::FlagNotFound
	}
}

/// Errors returned by provider lifecycle operations.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
	/// The provider could not reach a ready state yet.
	#[error("provider not ready: {0}")]
	NotReady(String),

	/// The provider can never become ready.
	#[error("fatal provider error: {0}")]
	Fatal(String),

	/// Generic initialization failure.
	#[error("{0}")]
	General(String),

	/// A constituent provider failed to initialize.
	#[error("provider '{provider}' failed to initialize: {source}")]
	Init {
		provider: String,
		#[source]
		source: Box<ProviderError>,
	},
}

impl ProviderError {
	/// Maps this error onto the resolution error taxonomy.
	pub fn code(&self) -> ErrorCode {
		match self {
			ProviderError::NotReady(_) => ErrorCode::ProviderNotReady,
			ProviderError::Fatal(_) => ErrorCode::ProviderFatal,
			ProviderError::General(_) => ErrorCode::General,
			ProviderError::Init { source, .. } => source.code(),
		}
	}
}

/// Error raised by a hook stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("hook '{hook}' failed: {message}")]
pub struct HookError {
	pub hook: String,
	pub message: String,
}

impl HookError {
	pub fn new(hook: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			hook: hook.into(),
			message: message.into(),
		}
	}
}

impl From<HookError> for ResolutionError {
	fn from(err: HookError) -> Self {
		ResolutionError::general(err.to_string())
	}
}
