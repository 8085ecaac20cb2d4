// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation strategies.
//!
//! A strategy turns the ordered list of isolated providers into one
//! resolution. Every strategy treats `FLAG_NOT_FOUND` as an abstention and
//! annotates its result with [`crate::metadata`] attribution keys.
//!
//! | Strategy | Concurrency | Hard error |
//! |----------|-------------|------------|
//! | [`FirstMatch`] | sequential, registration order | stops and is returned |
//! | [`FirstSuccess`] | parallel, with a timeout | surfaced only if nobody succeeds |
//! | [`Comparison`] | parallel, unbounded | aborts the whole call |

mod comparison;
mod first_match;
mod first_success;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use loom_flags_provider::{EvaluationContext, FlagValue, ResolutionDetail, ResolutionError};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use comparison::{Comparator, Comparison};
pub use first_match::FirstMatch;
pub use first_success::{FirstSuccess, DEFAULT_FIRST_SUCCESS_TIMEOUT};

use crate::error::MultiProviderError;
use crate::isolation::HookIsolator;
use crate::metadata::{Attribution, EVALUATION_ERROR};

#[async_trait]
pub trait EvaluationStrategy: Send + Sync + 'static {
	/// Name recorded under `multiprovider-strategy-used`.
	fn name(&self) -> &str;

	async fn evaluate(
		&self,
		providers: &[Arc<HookIsolator>],
		flag_key: &str,
		default: FlagValue,
		context: &EvaluationContext,
		cancel: &CancellationToken,
	) -> ResolutionDetail<FlagValue>;
}

/// Built-in strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
	#[default]
	FirstMatch,
	FirstSuccess,
	Comparison,
	/// Caller-supplied [`EvaluationStrategy`].
	Custom,
}

impl StrategyKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			StrategyKind::FirstMatch => "first-match",
			StrategyKind::FirstSuccess => "first-success",
			StrategyKind::Comparison => "comparison",
			StrategyKind::Custom => "custom",
		}
	}
}

impl fmt::Display for StrategyKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for StrategyKind {
	type Err = MultiProviderError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
			"first-match" => Ok(StrategyKind::FirstMatch),
			"first-success" => Ok(StrategyKind::FirstSuccess),
			"comparison" => Ok(StrategyKind::Comparison),
			"custom" => Ok(StrategyKind::Custom),
			_ => Err(MultiProviderError::UnknownStrategy(s.to_string())),
		}
	}
}

/// How one provider's resolution counts toward a strategy.
pub(crate) enum Outcome {
	Abstain,
	Failure(ResolutionError),
	Success(ResolutionDetail<FlagValue>),
}

impl Outcome {
	pub(crate) fn classify(detail: ResolutionDetail<FlagValue>) -> Self {
		match detail.error() {
			Some(err) if err.is_not_found() => Outcome::Abstain,
			Some(err) => Outcome::Failure(err.clone()),
			None => Outcome::Success(detail),
		}
	}
}

/// Stamps attribution onto a resolution, keeping provider metadata.
pub(crate) fn annotate(
	detail: ResolutionDetail<FlagValue>,
	attribution: Attribution<'_>,
) -> ResolutionDetail<FlagValue> {
	let error_text = detail.error().map(ToString::to_string);
	let detail = detail.with_metadata(attribution.to_metadata());
	match error_text {
		Some(text) => detail.with_metadata_entry(EVALUATION_ERROR, text),
		None => detail,
	}
}

/// The caller's default with an error, attributed to `provider`.
pub(crate) fn failed(
	default: FlagValue,
	err: impl Into<ResolutionError>,
	strategy: &str,
	provider: &str,
) -> ResolutionDetail<FlagValue> {
	annotate(
		ResolutionDetail::from_error(default, err.into()),
		Attribution::new(strategy, provider).defaulted(),
	)
}

#[cfg(test)]
pub(crate) mod testing {
	//! Scripted providers shared by the strategy tests.

	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
	use std::sync::Arc;
	use std::time::Duration;

	use async_trait::async_trait;
	use loom_flags_provider::{
		ClientMetadata, ErrorCode, FeatureProvider, FlagKind, FlattenedContext, ProviderMetadata,
		Reason, ResolutionDetail, ResolutionError,
	};

	use crate::isolation::HookIsolator;

	#[derive(Clone)]
	pub enum Script {
		Value(loom_flags_provider::FlagValue),
		Variant(loom_flags_provider::FlagValue, &'static str),
		NotFound,
		Fail(ErrorCode),
	}

	/// Answers every flag with the same scripted outcome after a delay.
	pub struct Scripted {
		pub script: Script,
		pub delay: Duration,
		pub calls: AtomicUsize,
	}

	impl Scripted {
		pub fn new(script: Script) -> Self {
			Self {
				script,
				delay: Duration::ZERO,
				calls: AtomicUsize::new(0),
			}
		}

		pub fn after(mut self, delay: Duration) -> Self {
			self.delay = delay;
			self
		}

		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}

		async fn answer<T: FlagKind>(&self, default: T) -> ResolutionDetail<T> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			if !self.delay.is_zero() {
				tokio::time::sleep(self.delay).await;
			}
			let err = match &self.script {
				Script::Value(v) => match T::from_flag_value(v.clone()) {
					Some(v) => return ResolutionDetail::new(v, Reason::Static),
					None => ResolutionError::type_mismatch("scripted"),
				},
				Script::Variant(v, variant) => match T::from_flag_value(v.clone()) {
					Some(v) => {
						return ResolutionDetail::new(v, Reason::TargetingMatch)
							.with_variant(*variant)
					}
					None => ResolutionError::type_mismatch("scripted"),
				},
				Script::NotFound => ResolutionError::flag_not_found("scripted"),
				Script::Fail(code) => ResolutionError::new(*code, "scripted failure"),
			};
			ResolutionDetail::from_error(default, err)
		}
	}

	#[async_trait]
	impl FeatureProvider for Scripted {
		fn metadata(&self) -> ProviderMetadata {
			ProviderMetadata::new("Scripted")
		}

		async fn resolve_bool(
			&self,
			_: &str,
			default: bool,
			_: &FlattenedContext,
		) -> ResolutionDetail<bool> {
			self.answer(default).await
		}

		async fn resolve_string(
			&self,
			_: &str,
			default: String,
			_: &FlattenedContext,
		) -> ResolutionDetail<String> {
			self.answer(default).await
		}

		async fn resolve_int(
			&self,
			_: &str,
			default: i64,
			_: &FlattenedContext,
		) -> ResolutionDetail<i64> {
			self.answer(default).await
		}

		async fn resolve_float(
			&self,
			_: &str,
			default: f64,
			_: &FlattenedContext,
		) -> ResolutionDetail<f64> {
			self.answer(default).await
		}

		async fn resolve_object(
			&self,
			_: &str,
			default: serde_json::Value,
			_: &FlattenedContext,
		) -> ResolutionDetail<serde_json::Value> {
			self.answer(default).await
		}
	}

	pub fn isolate(name: &str, provider: &Arc<Scripted>) -> Arc<HookIsolator> {
		let provider: Arc<dyn FeatureProvider> = provider.clone();
		Arc::new(HookIsolator::new(name, provider, Vec::new(), ClientMetadata::default()))
	}

	struct SetOnDrop(Arc<AtomicBool>);

	impl Drop for SetOnDrop {
		fn drop(&mut self) {
			self.0.store(true, Ordering::SeqCst);
		}
	}

	/// Never answers on its own. `abandoned()` turns true once an in-flight
	/// evaluation has been dropped.
	#[derive(Default)]
	pub struct Lingering {
		abandoned: Arc<AtomicBool>,
		started: AtomicUsize,
	}

	impl Lingering {
		pub fn started(&self) -> usize {
			self.started.load(Ordering::SeqCst)
		}

		pub fn abandoned(&self) -> bool {
			self.abandoned.load(Ordering::SeqCst)
		}

		/// Polls until the evaluation is dropped, giving up after a second.
		pub async fn wait_abandoned(&self) -> bool {
			for _ in 0..200 {
				if self.abandoned() {
					return true;
				}
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
			self.abandoned()
		}

		async fn linger<T>(&self, default: T) -> ResolutionDetail<T> {
			self.started.fetch_add(1, Ordering::SeqCst);
			let _guard = SetOnDrop(Arc::clone(&self.abandoned));
			tokio::time::sleep(Duration::from_secs(30)).await;
			ResolutionDetail::new(default, Reason::Static)
		}
	}

	#[async_trait]
	impl FeatureProvider for Lingering {
		fn metadata(&self) -> ProviderMetadata {
			ProviderMetadata::new("Lingering")
		}

		async fn resolve_bool(
			&self,
			_: &str,
			default: bool,
			_: &FlattenedContext,
		) -> ResolutionDetail<bool> {
			self.linger(default).await
		}

		async fn resolve_string(
			&self,
			_: &str,
			default: String,
			_: &FlattenedContext,
		) -> ResolutionDetail<String> {
			self.linger(default).await
		}

		async fn resolve_int(
			&self,
			_: &str,
			default: i64,
			_: &FlattenedContext,
		) -> ResolutionDetail<i64> {
			self.linger(default).await
		}

		async fn resolve_float(
			&self,
			_: &str,
			default: f64,
			_: &FlattenedContext,
		) -> ResolutionDetail<f64> {
			self.linger(default).await
		}

		async fn resolve_object(
			&self,
			_: &str,
			default: serde_json::Value,
			_: &FlattenedContext,
		) -> ResolutionDetail<serde_json::Value> {
			self.linger(default).await
		}
	}

	pub fn isolate_lingering(name: &str, provider: &Arc<Lingering>) -> Arc<HookIsolator> {
		let provider: Arc<dyn FeatureProvider> = provider.clone();
		Arc::new(HookIsolator::new(name, provider, Vec::new(), ClientMetadata::default()))
	}
}
