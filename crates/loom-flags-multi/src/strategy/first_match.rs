// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use loom_flags_provider::{EvaluationContext, FlagValue, ResolutionDetail};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{annotate, failed, EvaluationStrategy, StrategyKind};
use crate::error::EvaluationError;
use crate::isolation::HookIsolator;
use crate::metadata::{Attribution, NO_PROVIDER};

/// Asks providers one at a time in registration order and returns the first
/// answer that is not an abstention, error or not.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatch;

#[async_trait]
impl EvaluationStrategy for FirstMatch {
	fn name(&self) -> &str {
		StrategyKind::FirstMatch.as_str()
	}

	async fn evaluate(
		&self,
		providers: &[Arc<HookIsolator>],
		flag_key: &str,
		default: FlagValue,
		context: &EvaluationContext,
		cancel: &CancellationToken,
	) -> ResolutionDetail<FlagValue> {
		for provider in providers {
			if cancel.is_cancelled() {
				return failed(default, EvaluationError::Cancelled, self.name(), NO_PROVIDER);
			}

			let detail = provider.evaluate(flag_key, default.clone(), context).await;
			if detail.error().is_some_and(|e| e.is_not_found()) {
				debug!(provider = provider.name(), flag_key, "provider abstained");
				continue;
			}

			let mut attribution = Attribution::new(self.name(), provider.name());
			if detail.is_error() {
				attribution = attribution.defaulted();
			}
			return annotate(detail, attribution);
		}

		failed(
			default,
			EvaluationError::NoProviderMatched(flag_key.to_string()),
			self.name(),
			NO_PROVIDER,
		)
	}
}
