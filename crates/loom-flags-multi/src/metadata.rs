// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag metadata keys written by the orchestrator.

use loom_flags_provider::FlagMetadata;

/// Name of the strategy that produced the resolution.
pub const STRATEGY_USED: &str = "multiprovider-strategy-used";

/// Provider(s) that produced the value: a single name, a sorted comma-joined
/// list, [`FALLBACK_PROVIDER`] or [`NO_PROVIDER`].
pub const SUCCESSFUL_PROVIDER_NAME: &str = "multiprovider-successful-provider-name";

pub const FALLBACK_USED: &str = "multiprovider-fallback-used";

pub const IS_RESULT_DEFAULT: &str = "multiprovider-is-result-default";

pub const EVALUATION_ERROR: &str = "multiprovider-evaluation-error";

/// On outbound events: the provider whose event moved the aggregate state.
pub const PROVIDER_NAME: &str = "multiprovider-provider-name";

pub const PROVIDER_TYPE: &str = "multiprovider-provider-type";

pub const NO_PROVIDER: &str = "none";

pub const FALLBACK_PROVIDER: &str = "fallback";

/// Bookkeeping attached to every orchestrated resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution<'a> {
	pub strategy: &'a str,
	pub provider: &'a str,
	pub fallback_used: bool,
	pub is_default: bool,
}

impl<'a> Attribution<'a> {
	pub fn new(strategy: &'a str, provider: &'a str) -> Self {
		Self {
			strategy,
			provider,
			fallback_used: false,
			is_default: false,
		}
	}

	pub fn none(strategy: &'a str) -> Self {
		Self::new(strategy, NO_PROVIDER).defaulted()
	}

	pub fn fallback(mut self) -> Self {
		self.fallback_used = true;
		self
	}

	pub fn defaulted(mut self) -> Self {
		self.is_default = true;
		self
	}

	pub fn to_metadata(&self) -> FlagMetadata {
		FlagMetadata::new()
			.with(STRATEGY_USED, self.strategy)
			.with(SUCCESSFUL_PROVIDER_NAME, self.provider)
			.with(FALLBACK_USED, self.fallback_used)
			.with(IS_RESULT_DEFAULT, self.is_default)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn none_attribution_marks_default() {
		let md = Attribution::none("first-match").to_metadata();
		assert_eq!(md.get_str(STRATEGY_USED), Some("first-match"));
		assert_eq!(md.get_str(SUCCESSFUL_PROVIDER_NAME), Some(NO_PROVIDER));
		assert_eq!(md.get_bool(IS_RESULT_DEFAULT), Some(true));
		assert_eq!(md.get_bool(FALLBACK_USED), Some(false));
	}

	#[test]
	fn fallback_attribution() {
		let md = Attribution::new("comparison", FALLBACK_PROVIDER)
			.fallback()
			.to_metadata();
		assert_eq!(md.get_bool(FALLBACK_USED), Some(true));
		assert_eq!(md.get_bool(IS_RESULT_DEFAULT), Some(false));
	}
}
