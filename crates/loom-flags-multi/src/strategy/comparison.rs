// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use loom_flags_provider::{EvaluationContext, FlagType, FlagValue, Reason, ResolutionDetail};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument, Span};

use super::{annotate, failed, EvaluationStrategy, Outcome, StrategyKind};
use crate::error::EvaluationError;
use crate::isolation::HookIsolator;
use crate::metadata::{Attribution, FALLBACK_PROVIDER, NO_PROVIDER};

/// Decides whether a set of resolved values agree.
pub type Comparator = Arc<dyn Fn(&[FlagValue]) -> bool + Send + Sync>;

/// Evaluates every provider and returns the common value when they all
/// agree, deferring to the fallback provider when they do not.
///
/// Any hard error aborts the comparison; abstentions are ignored.
#[derive(Clone, Default)]
pub struct Comparison {
	fallback: Option<Arc<HookIsolator>>,
	comparator: Option<Comparator>,
}

impl Comparison {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_fallback(mut self, fallback: Arc<HookIsolator>) -> Self {
		self.fallback = Some(fallback);
		self
	}

	pub fn with_comparator(mut self, comparator: Comparator) -> Self {
		self.comparator = Some(comparator);
		self
	}

	pub fn fallback(&self) -> Option<&Arc<HookIsolator>> {
		self.fallback.as_ref()
	}

	fn agree(&self, values: &[FlagValue]) -> Result<bool, EvaluationError> {
		match &self.comparator {
			Some(comparator) => Ok(comparator(values)),
			None => values_agree(values),
		}
	}

	async fn evaluate_fallback(
		&self,
		flag_key: &str,
		default: FlagValue,
		context: &EvaluationContext,
	) -> ResolutionDetail<FlagValue> {
		let Some(fallback) = &self.fallback else {
			warn!(flag_key, "providers disagree and no fallback is configured");
			return failed(default, EvaluationError::NoFallback, self.name(), NO_PROVIDER);
		};

		debug!(flag_key, "providers disagree, using fallback");
		let detail = fallback.evaluate(flag_key, default, context).await;
		let attribution = Attribution::new(self.name(), FALLBACK_PROVIDER).fallback();
		if detail.is_error() {
			return annotate(detail, attribution.defaulted());
		}

		let variant = detail.variant().map(str::to_owned);
		let metadata = detail.metadata().clone();
		let mut resolved = ResolutionDetail::new(detail.into_value(), Reason::AggregatedFallback)
			.with_metadata(metadata);
		if let Some(variant) = variant {
			resolved = resolved.with_variant(variant);
		}
		annotate(resolved, attribution)
	}
}

#[async_trait]
impl EvaluationStrategy for Comparison {
	fn name(&self) -> &str {
		StrategyKind::Comparison.as_str()
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
		let mut tasks = JoinSet::new();

		for provider in providers {
			let provider = Arc::clone(provider);
			let scope = scope.clone();
			let flag_key = flag_key.to_string();
			let default = default.clone();
			let context = context.clone();
			tasks.spawn(
				async move {
					let name = provider.name().to_string();
					tokio::select! {
						_ = scope.cancelled() => (name, None),
						detail = provider.evaluate(&flag_key, default, &context) => {
							(name, Some(Outcome::classify(detail)))
						}
					}
				}
				.instrument(Span::current()),
			);
		}

		let mut answers: Vec<(String, ResolutionDetail<FlagValue>)> = Vec::new();
		loop {
			let joined = tokio::select! {
				_ = scope.cancelled() => {
					tasks.abort_all();
					return failed(default, EvaluationError::Cancelled, self.name(), NO_PROVIDER);
				}
				joined = tasks.join_next() => joined,
			};
			let Some(joined) = joined else {
				break;
			};

			match joined {
				Ok((name, Some(Outcome::Success(detail)))) => answers.push((name, detail)),
				Ok((name, Some(Outcome::Abstain))) => {
					debug!(provider = %name, flag_key, "provider abstained");
				}
				Ok((name, Some(Outcome::Failure(err)))) => {
					warn!(
						provider = %name,
						flag_key,
						code = %err.code,
						"provider failed, aborting comparison"
					);
					scope.cancel();
					tasks.abort_all();
					return failed(default, err, self.name(), &name);
				}
				Ok((_, None)) => {}
				Err(err) => {
					scope.cancel();
					tasks.abort_all();
					return failed(
						default,
						EvaluationError::TaskFailed(err.to_string()),
						self.name(),
						NO_PROVIDER,
					);
				}
			}
		}

		if answers.is_empty() {
			return annotate(
				ResolutionDetail::new(default, Reason::Default),
				Attribution::none(self.name()),
			);
		}

		let values: Vec<FlagValue> = answers.iter().map(|(_, d)| d.value().clone()).collect();
		match self.agree(&values) {
			Ok(true) => agreement(self.name(), answers),
			Ok(false) => self.evaluate_fallback(flag_key, default, context).await,
			Err(err) => {
				warn!(flag_key, error = %err, "values cannot be compared");
				failed(default, err, self.name(), NO_PROVIDER)
			}
		}
	}
}

fn agreement(
	strategy: &str,
	answers: Vec<(String, ResolutionDetail<FlagValue>)>,
) -> ResolutionDetail<FlagValue> {
	let mut names: Vec<&str> = answers.iter().map(|(name, _)| name.as_str()).collect();
	names.sort_unstable();
	let names = names.join(",");

	let mut variants: Vec<&str> = answers.iter().filter_map(|(_, d)| d.variant()).collect();
	variants.sort_unstable();
	variants.dedup();
	let variant = (!variants.is_empty()).then(|| variants.join(","));

	let value = answers[0].1.value().clone();
	let mut detail = ResolutionDetail::new(value, Reason::Aggregated);
	if let Some(variant) = variant {
		detail = detail.with_variant(variant);
	}
	annotate(detail, Attribution::new(strategy, &names))
}

/// Built-in agreement check.
///
/// Orderable kinds are sorted and deduplicated (floats by total order).
/// Object values that are JSON scalars are compared by set cardinality; JSON
/// objects and arrays are rejected.
pub(crate) fn values_agree(values: &[FlagValue]) -> Result<bool, EvaluationError> {
	let Some(first) = values.first() else {
		return Ok(true);
	};
	let kind = first.flag_type();
	if values.iter().any(|v| v.flag_type() != kind) {
		return Ok(false);
	}

	let distinct = match kind {
		FlagType::Bool => distinct_sorted(values.iter().filter_map(FlagValue::as_bool).collect()),
		FlagType::Int => distinct_sorted(values.iter().filter_map(FlagValue::as_int).collect()),
		FlagType::String => distinct_sorted(values.iter().filter_map(FlagValue::as_str).collect()),
		FlagType::Float => {
			let mut floats: Vec<f64> = values.iter().filter_map(FlagValue::as_float).collect();
			floats.sort_by(f64::total_cmp);
			floats.dedup_by(|a, b| a.total_cmp(b).is_eq());
			floats.len()
		}
		FlagType::Object => {
			let mut seen = BTreeSet::new();
			for value in values.iter().filter_map(FlagValue::as_object) {
				if value.is_object() || value.is_array() {
					return Err(EvaluationError::AggregationNotAllowed(FlagType::Object));
				}
				seen.insert(value.to_string());
			}
			seen.len()
		}
	};
	Ok(distinct == 1)
}

fn distinct_sorted<T: Ord>(mut items: Vec<T>) -> usize {
	items.sort_unstable();
	items.dedup();
	items.len()
}


#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn int_agreement_matches_all_equal(values in prop::collection::vec(-3i64..3, 1..8)) {
			let flags: Vec<FlagValue> = values.iter().copied().map(FlagValue::Int).collect();
			let expected = values.iter().all(|v| *v == values[0]);
			prop_assert_eq!(values_agree(&flags), Ok(expected));
		}

		#[test]
		fn string_agreement_is_order_independent(
			mut values in prop::collection::vec("[ab]{1,2}", 1..6),
		) {
			let forward: Vec<FlagValue> = values.iter().cloned().map(FlagValue::String).collect();
			values.reverse();
			let backward: Vec<FlagValue> = values.iter().cloned().map(FlagValue::String).collect();
			prop_assert_eq!(values_agree(&forward), values_agree(&backward));
		}
	}
}
