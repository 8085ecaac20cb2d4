// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-provider hook isolation.
//!
//! A [`HookIsolator`] wraps one named provider and runs its hook chain around
//! every evaluation. Each call builds its own [`HookContext`], so neither
//! concurrent calls through one isolator nor sibling providers inside one
//! orchestrated evaluation can see each other's hook side effects.
//!
//! Stage order per call:
//!
//! 1. `before` hooks, in order. Proposed contexts merge left to right (first
//!    writer wins per attribute) on top of the caller's context.
//! 2. The merged context is flattened and handed to the provider.
//! 3. Provider error: `error` hooks, no `after` hooks.
//! 4. Success: `after` hooks; an `after` failure runs `error` hooks but the
//!    resolution is still returned.
//! 5. `finally` hooks, always.

use std::sync::Arc;

use loom_flags_provider::{
	resolve_value, ClientMetadata, EvaluationContext, FeatureProvider, FlagValue, Hook,
	HookContext, HookHints, ProviderMetadata, ResolutionDetail, ResolutionError,
};
use tracing::{debug, warn};

pub struct HookIsolator {
	name: String,
	provider: Arc<dyn FeatureProvider>,
	hooks: Vec<Arc<dyn Hook>>,
	client: ClientMetadata,
	hints: HookHints,
}

impl HookIsolator {
	/// Wraps `provider`. `hooks` run first, followed by the provider's own.
	pub fn new(
		name: impl Into<String>,
		provider: Arc<dyn FeatureProvider>,
		hooks: Vec<Arc<dyn Hook>>,
		client: ClientMetadata,
	) -> Self {
		let mut hooks = hooks;
		hooks.extend(provider.hooks());
		Self {
			name: name.into(),
			provider,
			hooks,
			client,
			hints: HookHints::new(),
		}
	}

	pub fn with_hints(mut self, hints: HookHints) -> Self {
		self.hints = hints;
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn provider(&self) -> &Arc<dyn FeatureProvider> {
		&self.provider
	}

	pub fn metadata(&self) -> ProviderMetadata {
		self.provider.metadata()
	}

	pub fn hook_count(&self) -> usize {
		self.hooks.len()
	}

	/// Evaluates `flag_key` through the hook chain. The kind of `default`
	/// selects the provider's typed resolution method.
	pub async fn evaluate(
		&self,
		flag_key: &str,
		default: FlagValue,
		context: &EvaluationContext,
	) -> ResolutionDetail<FlagValue> {
		let mut hook_ctx = HookContext {
			flag_key: flag_key.to_string(),
			flag_type: default.flag_type(),
			default_value: default.clone(),
			client_metadata: self.client.clone(),
			provider_metadata: self.provider.metadata(),
			evaluation_context: context.clone(),
		};

		let mut proposed: Option<EvaluationContext> = None;
		for hook in &self.hooks {
			match hook.before(&hook_ctx, &self.hints).await {
				Ok(Some(ctx)) => {
					let merged = match proposed.take() {
						Some(earlier) => earlier.merge(&ctx),
						None => ctx,
					};
					hook_ctx.evaluation_context = merged.clone().merge(context);
					proposed = Some(merged);
				}
				Ok(None) => {}
				Err(err) => {
					warn!(
						provider = %self.name,
						hook = hook.name(),
						flag_key,
						error = %err,
						"before hook failed"
					);
					let err = ResolutionError::from(err);
					self.run_error_hooks(&hook_ctx, &err).await;
					let detail = ResolutionDetail::from_error(default, err);
					self.run_finally_hooks(&hook_ctx, &detail).await;
					return detail;
				}
			}
		}

		let flattened = hook_ctx.evaluation_context.flatten();
		let detail = resolve_value(self.provider.as_ref(), flag_key, default, &flattened).await;

		if let Some(err) = detail.error() {
			debug!(provider = %self.name, flag_key, code = %err.code, "provider returned error");
			self.run_error_hooks(&hook_ctx, err).await;
		} else {
			for hook in &self.hooks {
				if let Err(err) = hook.after(&hook_ctx, &detail, &self.hints).await {
					warn!(
						provider = %self.name,
						hook = hook.name(),
						flag_key,
						error = %err,
						"after hook failed"
					);
					self.run_error_hooks(&hook_ctx, &ResolutionError::from(err)).await;
					break;
				}
			}
		}

		self.run_finally_hooks(&hook_ctx, &detail).await;
		detail
	}

	async fn run_error_hooks(&self, ctx: &HookContext, err: &ResolutionError) {
		for hook in &self.hooks {
			hook.error(ctx, err, &self.hints).await;
		}
	}

	async fn run_finally_hooks(&self, ctx: &HookContext, detail: &ResolutionDetail<FlagValue>) {
		for hook in &self.hooks {
			hook.finally(ctx, detail, &self.hints).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use loom_flags_provider::{
		ErrorCode, FlattenedContext, HookError, InMemoryFlag, InMemoryProvider, Reason,
	};
	use parking_lot::Mutex;
	use serde_json::json;

	/// Records every stage it sees and optionally proposes a context.
	struct Recorder {
		label: &'static str,
		log: Arc<Mutex<Vec<String>>>,
		propose: Option<EvaluationContext>,
		fail_before: bool,
		fail_after: bool,
	}

	impl Recorder {
		fn new(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
			Self {
				label,
				log: Arc::clone(log),
				propose: None,
				fail_before: false,
				fail_after: false,
			}
		}

		fn proposing(mut self, ctx: EvaluationContext) -> Self {
			self.propose = Some(ctx);
			self
		}

		fn push(&self, stage: &str) {
			self.log.lock().push(format!("{}:{stage}", self.label));
		}
	}

	#[async_trait]
	impl Hook for Recorder {
		fn name(&self) -> &str {
			self.label
		}

		async fn before(
			&self,
			_ctx: &HookContext,
			_hints: &HookHints,
		) -> Result<Option<EvaluationContext>, HookError> {
			self.push("before");
			if self.fail_before {
				return Err(HookError::new(self.label, "rejected"));
			}
			Ok(self.propose.clone())
		}

		async fn after(
			&self,
			_ctx: &HookContext,
			_details: &ResolutionDetail<FlagValue>,
			_hints: &HookHints,
		) -> Result<(), HookError> {
			self.push("after");
			if self.fail_after {
				return Err(HookError::new(self.label, "after failed"));
			}
			Ok(())
		}

		async fn error(&self, _ctx: &HookContext, _error: &ResolutionError, _hints: &HookHints) {
			self.push("error");
		}

		async fn finally(
			&self,
			_ctx: &HookContext,
			_details: &ResolutionDetail<FlagValue>,
			_hints: &HookHints,
		) {
			self.push("finally");
		}
	}

	/// Echoes the targeting key and `plan` attribute it receives.
	struct ContextEcho;

	#[async_trait]
	impl FeatureProvider for ContextEcho {
		fn metadata(&self) -> ProviderMetadata {
			ProviderMetadata::new("ContextEcho")
		}

		async fn resolve_bool(
			&self,
			_: &str,
			default: bool,
			_: &FlattenedContext,
		) -> ResolutionDetail<bool> {
			ResolutionDetail::new(default, Reason::Default)
		}

		async fn resolve_string(
			&self,
			_: &str,
			_: String,
			context: &FlattenedContext,
		) -> ResolutionDetail<String> {
			let key = context.targeting_key().unwrap_or("-");
			let plan = context.get("plan").and_then(|v| v.as_str()).unwrap_or("-");
			ResolutionDetail::new(format!("{key}/{plan}"), Reason::TargetingMatch)
		}

		async fn resolve_int(
			&self,
			_: &str,
			default: i64,
			_: &FlattenedContext,
		) -> ResolutionDetail<i64> {
			ResolutionDetail::new(default, Reason::Default)
		}

		async fn resolve_float(
			&self,
			_: &str,
			default: f64,
			_: &FlattenedContext,
		) -> ResolutionDetail<f64> {
			ResolutionDetail::new(default, Reason::Default)
		}

		async fn resolve_object(
			&self,
			_: &str,
			default: serde_json::Value,
			_: &FlattenedContext,
		) -> ResolutionDetail<serde_json::Value> {
			ResolutionDetail::new(default, Reason::Default)
		}
	}

	fn memory() -> Arc<dyn FeatureProvider> {
		let flag = InMemoryFlag::constant("on", FlagValue::Bool(true));
		Arc::new(InMemoryProvider::new("mem").with_flag("on", flag))
	}

	fn log() -> Arc<Mutex<Vec<String>>> {
		Arc::new(Mutex::new(Vec::new()))
	}

	#[tokio::test]
	async fn success_runs_before_after_finally_in_order() {
		let log = log();
		let hooks: Vec<Arc<dyn Hook>> = vec![
			Arc::new(Recorder::new("a", &log)),
			Arc::new(Recorder::new("b", &log)),
		];
		let isolator = HookIsolator::new("mem", memory(), hooks, ClientMetadata::default());

		let detail = isolator
			.evaluate("on", FlagValue::Bool(false), &EvaluationContext::default())
			.await;

		assert_eq!(detail.value(), &FlagValue::Bool(true));
		assert_eq!(
			*log.lock(),
			vec!["a:before", "b:before", "a:after", "b:after", "a:finally", "b:finally"]
		);
	}

	#[tokio::test]
	async fn provider_error_skips_after_hooks() {
		let log = log();
		let hooks: Vec<Arc<dyn Hook>> = vec![Arc::new(Recorder::new("a", &log))];
		let isolator = HookIsolator::new("mem", memory(), hooks, ClientMetadata::default());

		let detail = isolator
			.evaluate("missing", FlagValue::Bool(false), &EvaluationContext::default())
			.await;

		assert_eq!(detail.error_code(), Some(ErrorCode::FlagNotFound));
		assert_eq!(*log.lock(), vec!["a:before", "a:error", "a:finally"]);
	}

	#[tokio::test]
	async fn after_failure_keeps_resolution() {
		let log = log();
		let mut failing = Recorder::new("a", &log);
		failing.fail_after = true;
		let hooks: Vec<Arc<dyn Hook>> = vec![Arc::new(failing), Arc::new(Recorder::new("b", &log))];
		let isolator = HookIsolator::new("mem", memory(), hooks, ClientMetadata::default());

		let detail = isolator
			.evaluate("on", FlagValue::Bool(false), &EvaluationContext::default())
			.await;

		assert_eq!(detail.value(), &FlagValue::Bool(true));
		assert!(!detail.is_error());
		assert_eq!(
			*log.lock(),
			vec!["a:before", "b:before", "a:after", "a:error", "b:error", "a:finally", "b:finally"]
		);
	}

	#[tokio::test]
	async fn before_failure_is_an_error_resolution() {
		let log = log();
		let mut failing = Recorder::new("a", &log);
		failing.fail_before = true;
		let hooks: Vec<Arc<dyn Hook>> = vec![Arc::new(failing), Arc::new(Recorder::new("b", &log))];
		let isolator = HookIsolator::new("mem", memory(), hooks, ClientMetadata::default());

		let detail = isolator
			.evaluate("on", FlagValue::Bool(false), &EvaluationContext::default())
			.await;

		assert_eq!(detail.value(), &FlagValue::Bool(false));
		assert_eq!(detail.error_code(), Some(ErrorCode::General));
		assert_eq!(*log.lock(), vec!["a:before", "a:error", "b:error", "a:finally", "b:finally"]);
	}

	#[tokio::test]
	async fn before_proposals_merge_first_writer_wins() {
		let log = log();
		let hooks: Vec<Arc<dyn Hook>> = vec![
			Arc::new(
				Recorder::new("a", &log)
					.proposing(EvaluationContext::default().with_attribute("plan", json!("pro"))),
			),
			Arc::new(
				Recorder::new("b", &log).proposing(
					EvaluationContext::new("hooked").with_attribute("plan", json!("free")),
				),
			),
		];
		let isolator =
			HookIsolator::new("echo", Arc::new(ContextEcho), hooks, ClientMetadata::default());

		let caller = EvaluationContext::default().with_attribute("plan", json!("caller"));
		let detail = isolator
			.evaluate("who", FlagValue::String(String::new()), &caller)
			.await;

		assert_eq!(detail.value(), &FlagValue::String("hooked/pro".to_string()));
	}

	#[tokio::test]
	async fn sibling_isolators_do_not_share_hook_context() {
		let log = log();
		let mutating: Vec<Arc<dyn Hook>> = vec![Arc::new(
			Recorder::new("m", &log).proposing(EvaluationContext::new("mutated")),
		)];
		let provider: Arc<dyn FeatureProvider> = Arc::new(ContextEcho);
		let first =
			HookIsolator::new("first", Arc::clone(&provider), mutating, ClientMetadata::default());
		let second = HookIsolator::new("second", provider, Vec::new(), ClientMetadata::default());

		let caller = EvaluationContext::new("caller");
		let (a, b) = tokio::join!(
			first.evaluate("who", FlagValue::String(String::new()), &caller),
			second.evaluate("who", FlagValue::String(String::new()), &caller),
		);

		assert_eq!(a.value(), &FlagValue::String("mutated/-".to_string()));
		assert_eq!(b.value(), &FlagValue::String("caller/-".to_string()));
	}

	/// Copies the targeting key it sees into `plan`, yielding in between so
	/// concurrent calls interleave.
	struct CopyKeyToPlan;

	#[async_trait]
	impl Hook for CopyKeyToPlan {
		async fn before(
			&self,
			ctx: &HookContext,
			_hints: &HookHints,
		) -> Result<Option<EvaluationContext>, HookError> {
			let key = ctx.evaluation_context.targeting_key.clone();
			tokio::time::sleep(std::time::Duration::from_millis(2)).await;
			let plan = json!(format!("plan-{key}"));
			Ok(Some(EvaluationContext::default().with_attribute("plan", plan)))
		}
	}

	#[tokio::test]
	async fn concurrent_calls_through_one_isolator_see_only_their_context() {
		let hooks: Vec<Arc<dyn Hook>> = vec![Arc::new(CopyKeyToPlan)];
		let isolator = Arc::new(HookIsolator::new(
			"echo",
			Arc::new(ContextEcho),
			hooks,
			ClientMetadata::default(),
		));

		let calls = (0..8).map(|i| {
			let isolator = Arc::clone(&isolator);
			tokio::spawn(async move {
				let caller = EvaluationContext::new(format!("user-{i}"));
				let detail = isolator
					.evaluate("who", FlagValue::String(String::new()), &caller)
					.await;
				(i, detail)
			})
		});

		for joined in futures::future::join_all(calls).await {
			let (i, detail) = joined.unwrap();
			assert_eq!(
				detail.value(),
				&FlagValue::String(format!("user-{i}/plan-user-{i}"))
			);
		}
	}
}

