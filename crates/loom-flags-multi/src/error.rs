// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for multi-provider construction, configuration and evaluation.

use std::path::PathBuf;
use std::time::Duration;

use loom_flags_provider::{ErrorCode, FlagType, ResolutionError};
use thiserror::Error;

/// Result type alias for multi-provider construction.
pub type Result<T> = std::result::Result<T, MultiProviderError>;

/// Errors returned while building a [`crate::MultiProvider`].
#[derive(Debug, Error)]
pub enum MultiProviderError {
	#[error("at least one provider is required")]
	EmptyProviders,

	#[error("provider name must not be empty")]
	EmptyProviderName,

	#[error("duplicate provider name: {0}")]
	DuplicateProviderName(String),

	#[error("unknown strategy: {0}")]
	UnknownStrategy(String),

	#[error("strategy '{strategy}' requires option '{option}'")]
	MissingStrategyOption {
		strategy: String,
		option: &'static str,
	},

	#[error("invalid option '{option}' for strategy '{strategy}': {message}")]
	InvalidStrategyOption {
		strategy: String,
		option: &'static str,
		message: String,
	},

	#[error("hooks configured for unknown provider: {0}")]
	UnknownProvider(String),

	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },
}

/// Failures produced by the orchestrator itself during an evaluation.
///
/// These never escape the public surface as `Err`; they are folded into the
/// resolution via `From<EvaluationError> for ResolutionError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
	#[error("no provider returned a value for flag '{0}'")]
	NoProviderMatched(String),

	#[error("deadline of {0:?} exceeded before any provider succeeded")]
	DeadlineExceeded(Duration),

	#[error("evaluation cancelled")]
	Cancelled,

	#[error("aggregation not allowed: {0} values need a custom comparator")]
	AggregationNotAllowed(FlagType),

	#[error("no fallback provider configured")]
	NoFallback,

	#[error("provider task failed: {0}")]
	TaskFailed(String),
}

impl From<EvaluationError> for ResolutionError {
	fn from(err: EvaluationError) -> Self {
		let code = match &err {
			EvaluationError::NoProviderMatched(_) => ErrorCode::FlagNotFound,
			_ => ErrorCode::General,
		};
		ResolutionError::new(code, err.to_string())
	}
}

/// Joins per-provider errors into one, each tagged with its provider name.
///
/// The shared code is kept when every error carries the same one; mixed codes
/// collapse to `GENERAL`.
pub fn aggregate_errors(errors: &[(String, ResolutionError)]) -> ResolutionError {
	let code = match errors.split_first() {
		Some(((_, first), rest)) if rest.iter().all(|(_, e)| e.code == first.code) => first.code,
		_ => ErrorCode::General,
	};
	let message = errors
		.iter()
		.map(|(name, err)| format!("{name}: {err}"))
		.collect::<Vec<_>>()
		.join("; ");
	ResolutionError::new(code, message)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn aggregate_keeps_shared_code() {
		let errors = vec![
			("a".to_string(), ResolutionError::new(ErrorCode::ProviderNotReady, "warming")),
			("b".to_string(), ResolutionError::new(ErrorCode::ProviderNotReady, "offline")),
		];
		let err = aggregate_errors(&errors);
		assert_eq!(err.code, ErrorCode::ProviderNotReady);
		assert!(err.message.contains("a: PROVIDER_NOT_READY: warming"));
		assert!(err.message.contains("b: PROVIDER_NOT_READY: offline"));
	}

	#[test]
	fn aggregate_mixed_codes_is_general() {
		let errors = vec![
			("a".to_string(), ResolutionError::new(ErrorCode::ParseError, "bad rule")),
			("b".to_string(), ResolutionError::general("boom")),
		];
		assert_eq!(aggregate_errors(&errors).code, ErrorCode::General);
	}

	#[test]
	fn evaluation_errors_map_to_resolution_codes() {
		let err: ResolutionError = EvaluationError::NoProviderMatched("x".to_string()).into();
		assert!(err.is_not_found());

		let err: ResolutionError = EvaluationError::AggregationNotAllowed(FlagType::Object).into();
		assert_eq!(err.code, ErrorCode::General);
		assert!(err.message.contains("aggregation not allowed"));
	}
}
