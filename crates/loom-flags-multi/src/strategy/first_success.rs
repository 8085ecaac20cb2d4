// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_flags_provider::{EvaluationContext, FlagValue, Reason, ResolutionDetail, ResolutionError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument, Span};

use super::{annotate, failed, EvaluationStrategy, Outcome, StrategyKind};
use crate::error::{aggregate_errors, EvaluationError, MultiProviderError};
use crate::isolation::HookIsolator;
use crate::metadata::{Attribution, NO_PROVIDER};

pub const DEFAULT_FIRST_SUCCESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Races every provider and returns the first success.
///
/// Losing tasks are signalled through a child cancellation scope and aborted
/// when the race ends; a loser that already produced a value has it dropped.
#[derive(Debug, Clone)]
pub struct FirstSuccess {
	timeout: Duration,
}

impl FirstSuccess {
	pub fn new(timeout: Duration) -> Result<Self, MultiProviderError> {
		if timeout.is_zero() {
			return Err(MultiProviderError::InvalidStrategyOption {
				strategy: StrategyKind::FirstSuccess.to_string(),
				option: "timeout",
				message: "must be greater than zero".to_string(),
			});
		}
		Ok(Self { timeout })
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}
}

impl Default for FirstSuccess {
	fn default() -> Self {
		Self {
			timeout: DEFAULT_FIRST_SUCCESS_TIMEOUT,
		}
	}
}

#[async_trait]
impl EvaluationStrategy for FirstSuccess {
	fn name(&self) -> &str {
		StrategyKind::FirstSuccess.as_str()
	}

	async fn evaluate(
		&self,
		providers: &[Arc<HookIsolator>],
		flag_key: &str,
		default: FlagValue,
		context: &EvaluationContext,
		cancel: &CancellationToken,
	) -> ResolutionDetail<FlagValue> {
		if cancel.is_cancelled() {
			return failed(default, EvaluationError::Cancelled, self.name(), NO_PROVIDER);
		}

		let scope = cancel.child_token();
		let (tx, mut rx) = mpsc::channel::<(String, Outcome)>(providers.len().max(1));
		let mut tasks = JoinSet::new();

		for provider in providers {
			let provider = Arc::clone(provider);
			let tx = tx.clone();
			let scope = scope.clone();
			let flag_key = flag_key.to_string();
			let default = default.clone();
			let context = context.clone();
			tasks.spawn(
				async move {
					let detail = tokio::select! {
						_ = scope.cancelled() => return,
						detail = provider.evaluate(&flag_key, default, &context) => detail,
					};
					// The coordinator may already be gone.
					let _ = tx.send((provider.name().to_string(), Outcome::classify(detail))).await;
				}
				.instrument(Span::current()),
			);
		}
		drop(tx);

		let deadline = tokio::time::sleep(self.timeout);
		tokio::pin!(deadline);

		let total = providers.len();
		let mut abstained = 0usize;
		let mut errors: Vec<(String, ResolutionError)> = Vec::new();

		let result = loop {
			if abstained + errors.len() == total {
				break None;
			}
			tokio::select! {
				received = rx.recv() => match received {
					Some((name, Outcome::Success(detail))) => {
						debug!(provider = %name, flag_key, "first success");
						break Some(annotate(detail, Attribution::new(self.name(), &name)));
					}
					Some((name, Outcome::Abstain)) => {
						debug!(provider = %name, flag_key, "provider abstained");
						abstained += 1;
					}
					Some((name, Outcome::Failure(err))) => {
						debug!(provider = %name, flag_key, code = %err.code, "provider failed");
						errors.push((name, err));
					}
					None => {
						let missing = total - abstained - errors.len();
						warn!(missing, flag_key, "provider tasks ended without reporting");
						errors.push((
							NO_PROVIDER.to_string(),
							EvaluationError::TaskFailed(format!(
								"{missing} task(s) ended without a result"
							))
							.into(),
						));
						break None;
					}
				},
				_ = &mut deadline => {
					warn!(
						flag_key,
						timeout_ms = self.timeout.as_millis() as u64,
						collected = errors.len(),
						"first-success deadline exceeded"
					);
					let err: ResolutionError = if errors.is_empty() {
						EvaluationError::DeadlineExceeded(self.timeout).into()
					} else {
						aggregate_errors(&errors)
					};
					break Some(failed(default.clone(), err, self.name(), NO_PROVIDER));
				}
				_ = scope.cancelled() => {
					break Some(failed(
						default.clone(),
						EvaluationError::Cancelled,
						self.name(),
						NO_PROVIDER,
					));
				}
			}
		};

		scope.cancel();
		tasks.abort_all();

		if let Some(detail) = result {
			return detail;
		}

		if errors.is_empty() {
			return annotate(
				ResolutionDetail::new(default, Reason::Default),
				Attribution::none(self.name()),
			);
		}

		failed(default, aggregate_errors(&errors), self.name(), NO_PROVIDER)
	}
}
