// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The [`MultiProvider`] facade.
//!
//! Combines named providers behind one [`FeatureProvider`] using an
//! [`EvaluationStrategy`], and presents their lifecycle, events and tracking
//! as a single provider.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use loom_flags_provider::{
	into_typed, ClientMetadata, ErrorCode, EvaluationContext, EventSource, FeatureProvider,
	FlagKind, FlattenedContext, Hook, Lifecycle, ProviderError, ProviderEvent, ProviderMetadata,
	ProviderState, ResolutionDetail, ResolutionError, Tracker, TrackingEventDetails,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::{MultiProviderConfig, DEFAULT_EVENT_BUFFER};
use crate::error::{MultiProviderError, Result};
use crate::events::{aggregate_event, EventBinding, EventForwarder};
use crate::isolation::HookIsolator;
use crate::metadata::FALLBACK_PROVIDER;
use crate::registry::{CapabilityId, CapabilityRegistry};
use crate::state::StateAggregator;
use crate::strategy::{
	Comparator, Comparison, EvaluationStrategy, FirstMatch, FirstSuccess, StrategyKind,
	DEFAULT_FIRST_SUCCESS_TIMEOUT,
};

/// Provider name reported by the facade and stamped on its outbound events.
pub const MULTI_PROVIDER_NAME: &str = "MultiProvider";

const SHUT_DOWN: &str = "multi-provider has been shut down";

/// Builder for [`MultiProvider`].
pub struct MultiProviderBuilder {
	providers: Vec<(String, Arc<dyn FeatureProvider>)>,
	strategy: StrategyKind,
	custom_strategy: Option<Arc<dyn EvaluationStrategy>>,
	first_success_timeout: Duration,
	fallback: Option<Arc<dyn FeatureProvider>>,
	comparator: Option<Comparator>,
	hooks: Vec<Arc<dyn Hook>>,
	provider_hooks: Vec<(String, Arc<dyn Hook>)>,
	client: ClientMetadata,
	span: Option<Span>,
	event_buffer: usize,
}

impl Default for MultiProviderBuilder {
	fn default() -> Self {
		Self {
			providers: Vec::new(),
			strategy: StrategyKind::default(),
			custom_strategy: None,
			first_success_timeout: DEFAULT_FIRST_SUCCESS_TIMEOUT,
			fallback: None,
			comparator: None,
			hooks: Vec::new(),
			provider_hooks: Vec::new(),
			client: ClientMetadata::default(),
			span: None,
			event_buffer: DEFAULT_EVENT_BUFFER,
		}
	}
}

impl MultiProviderBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts from loaded configuration. Providers and hooks still come from
	/// code.
	pub fn from_config(config: &MultiProviderConfig) -> Self {
		let mut builder = Self::new()
			.strategy(config.strategy)
			.first_success_timeout(config.first_success_timeout)
			.event_buffer(config.event_buffer);
		if let Some(domain) = &config.client_domain {
			builder = builder.client_domain(domain.clone());
		}
		builder
	}

	/// Adds a named provider. Registration order is evaluation order for
	/// [`FirstMatch`].
	pub fn provider(mut self, name: impl Into<String>, provider: Arc<dyn FeatureProvider>) -> Self {
		self.providers.push((name.into(), provider));
		self
	}

	pub fn strategy(mut self, strategy: StrategyKind) -> Self {
		self.strategy = strategy;
		self
	}

	/// Uses a caller-supplied strategy instead of a built-in one.
	pub fn custom_strategy(mut self, strategy: Arc<dyn EvaluationStrategy>) -> Self {
		self.strategy = StrategyKind::Custom;
		self.custom_strategy = Some(strategy);
		self
	}

	pub fn first_success_timeout(mut self, timeout: Duration) -> Self {
		self.first_success_timeout = timeout;
		self
	}

	/// Provider consulted by [`Comparison`] when the others disagree.
	pub fn fallback(mut self, provider: Arc<dyn FeatureProvider>) -> Self {
		self.fallback = Some(provider);
		self
	}

	pub fn comparator(mut self, comparator: Comparator) -> Self {
		self.comparator = Some(comparator);
		self
	}

	/// Adds a hook run around every provider's evaluation.
	pub fn hook(mut self, hook: Arc<dyn Hook>) -> Self {
		self.hooks.push(hook);
		self
	}

	/// Adds a hook run only around the named provider's evaluation.
	pub fn provider_hook(mut self, name: impl Into<String>, hook: Arc<dyn Hook>) -> Self {
		self.provider_hooks.push((name.into(), hook));
		self
	}

	pub fn client_domain(mut self, domain: impl Into<String>) -> Self {
		self.client = ClientMetadata::new(domain);
		self
	}

	/// Span that instruments evaluations and background tasks.
	pub fn span(mut self, span: Span) -> Self {
		self.span = Some(span);
		self
	}

	pub fn event_buffer(mut self, capacity: usize) -> Self {
		self.event_buffer = capacity;
		self
	}

	pub fn build(self) -> Result<MultiProvider> {
		if self.providers.is_empty() {
			return Err(MultiProviderError::EmptyProviders);
		}

		let mut seen = HashSet::new();
		for (name, _) in &self.providers {
			if name.is_empty() {
				return Err(MultiProviderError::EmptyProviderName);
			}
			if !seen.insert(name.as_str()) {
				return Err(MultiProviderError::DuplicateProviderName(name.clone()));
			}
		}
		for (name, _) in &self.provider_hooks {
			if !seen.contains(name.as_str()) {
				return Err(MultiProviderError::UnknownProvider(name.clone()));
			}
		}

		let span = self.span.unwrap_or_else(|| info_span!("multi_provider"));
		let registry = CapabilityRegistry::new();
		let mut bindings = Vec::with_capacity(self.providers.len() + 1);

		let mut handles = Vec::with_capacity(self.providers.len());
		for (name, provider) in &self.providers {
			let mut hooks = self.hooks.clone();
			hooks.extend(
				self.provider_hooks
					.iter()
					.filter(|(target, _)| target == name)
					.map(|(_, hook)| Arc::clone(hook)),
			);
			bindings.push(registry.acquire(Some(name.as_str()), provider));
			handles.push(Arc::new(HookIsolator::new(
				name.clone(),
				Arc::clone(provider),
				hooks,
				self.client.clone(),
			)));
		}

		let comparison_only = self.fallback.is_some() || self.comparator.is_some();
		if self.strategy != StrategyKind::Comparison && comparison_only {
			warn!(
				strategy = %self.strategy,
				"fallback and comparator only apply to the comparison strategy"
			);
		}

		let strategy: Arc<dyn EvaluationStrategy> = match self.strategy {
			StrategyKind::FirstMatch => Arc::new(FirstMatch),
			StrategyKind::FirstSuccess => Arc::new(FirstSuccess::new(self.first_success_timeout)?),
			StrategyKind::Comparison => {
				let mut comparison = Comparison::new();
				if let Some(fallback) = &self.fallback {
					bindings.push(registry.acquire(None, fallback));
					comparison = comparison.with_fallback(Arc::new(HookIsolator::new(
						FALLBACK_PROVIDER,
						Arc::clone(fallback),
						self.hooks.clone(),
						self.client.clone(),
					)));
				}
				if let Some(comparator) = self.comparator {
					comparison = comparison.with_comparator(comparator);
				}
				Arc::new(comparison)
			}
			StrategyKind::Custom => {
				self.custom_strategy
					.ok_or_else(|| MultiProviderError::MissingStrategyOption {
						strategy: StrategyKind::Custom.to_string(),
						option: "strategy",
					})?
			}
		};

		let names: Vec<String> = self.providers.iter().map(|(name, _)| name.clone()).collect();
		let aggregator = Arc::new(StateAggregator::new(names.clone()));
		let forwarder = EventForwarder::new(
			MULTI_PROVIDER_NAME,
			Arc::clone(&aggregator),
			self.event_buffer,
			span.clone(),
		);

		span.in_scope(|| {
			info!(
				providers = names.len(),
				capabilities = registry.len(),
				strategy = strategy.name(),
				"multi-provider built"
			)
		});

		Ok(MultiProvider {
			names,
			handles: handles.into(),
			strategy,
			registry,
			bindings,
			aggregator,
			forwarder,
			cancel: CancellationToken::new(),
			span,
		})
	}
}

/// Several providers combined into one.
pub struct MultiProvider {
	names: Vec<String>,
	handles: Arc<[Arc<HookIsolator>]>,
	strategy: Arc<dyn EvaluationStrategy>,
	registry: CapabilityRegistry,
	bindings: Vec<CapabilityId>,
	aggregator: Arc<StateAggregator>,
	forwarder: EventForwarder,
	cancel: CancellationToken,
	span: Span,
}

impl MultiProvider {
	pub fn builder() -> MultiProviderBuilder {
		MultiProviderBuilder::new()
	}

	/// Handle names in registration order.
	pub fn provider_names(&self) -> Vec<&str> {
		self.names.iter().map(String::as_str).collect()
	}

	pub fn strategy_name(&self) -> &str {
		self.strategy.name()
	}

	/// Per-handle state snapshot.
	pub fn provider_states(&self) -> BTreeMap<String, ProviderState> {
		self.aggregator.snapshot()
	}

	/// True once [`Lifecycle::shutdown`] has run. A shut-down facade cannot be
	/// initialized again.
	pub fn is_shut_down(&self) -> bool {
		self.cancel.is_cancelled()
	}

	async fn evaluate<T: FlagKind>(
		&self,
		flag_key: &str,
		default: T,
		context: &FlattenedContext,
	) -> ResolutionDetail<T> {
		if self.is_shut_down() {
			return ResolutionDetail::from_error(
				default,
				ResolutionError::new(ErrorCode::ProviderFatal, SHUT_DOWN),
			);
		}

		let context = context.deepen();
		let detail = self
			.strategy
			.evaluate(
				&self.handles,
				flag_key,
				default.clone().into_flag_value(),
				&context,
				&self.cancel,
			)
			.instrument(self.span.clone())
			.await;

		self.span.in_scope(|| {
			debug!(
				flag_key,
				strategy = self.strategy.name(),
				reason = %detail.reason(),
				error = detail.error().map(|e| e.code.as_str()),
				"flag evaluated"
			)
		});
		into_typed(detail, default)
	}
}

#[async_trait]
impl FeatureProvider for MultiProvider {
	fn metadata(&self) -> ProviderMetadata {
		ProviderMetadata::new(MULTI_PROVIDER_NAME)
			.with_attribute("providers", self.names.join(","))
			.with_attribute("strategy", self.strategy.name())
	}

	async fn resolve_bool(
		&self,
		flag_key: &str,
		default: bool,
		context: &FlattenedContext,
	) -> ResolutionDetail<bool> {
		self.evaluate(flag_key, default, context).await
	}

	async fn resolve_string(
		&self,
		flag_key: &str,
		default: String,
		context: &FlattenedContext,
	) -> ResolutionDetail<String> {
		self.evaluate(flag_key, default, context).await
	}

	async fn resolve_int(
		&self,
		flag_key: &str,
		default: i64,
		context: &FlattenedContext,
	) -> ResolutionDetail<i64> {
		self.evaluate(flag_key, default, context).await
	}

	async fn resolve_float(
		&self,
		flag_key: &str,
		default: f64,
		context: &FlattenedContext,
	) -> ResolutionDetail<f64> {
		self.evaluate(flag_key, default, context).await
	}

	async fn resolve_object(
		&self,
		flag_key: &str,
		default: serde_json::Value,
		context: &FlattenedContext,
	) -> ResolutionDetail<serde_json::Value> {
		self.evaluate(flag_key, default, context).await
	}

	fn lifecycle(&self) -> Option<&dyn Lifecycle> {
		Some(self)
	}

	fn events(&self) -> Option<&dyn EventSource> {
		Some(self)
	}

	fn tracker(&self) -> Option<&dyn Tracker> {
		Some(self)
	}
}

#[async_trait]
impl Lifecycle for MultiProvider {
	/// Initializes every distinct capability concurrently, then starts event
	/// forwarding. Any failure fails the whole call; siblings that did
	/// initialize stay initialized.
	async fn init(&self, context: &EvaluationContext) -> std::result::Result<(), ProviderError> {
		if self.is_shut_down() {
			return Err(ProviderError::Fatal(SHUT_DOWN.to_string()));
		}

		let capabilities = self.registry.capabilities();

		// Subscribe before init so events emitted during init are not lost.
		let bindings: Vec<EventBinding> = capabilities
			.iter()
			.filter(|cap| !cap.names.is_empty())
			.filter_map(|cap| {
				cap.provider.events().map(|source| EventBinding {
					names: cap.names.clone(),
					provider_type: cap.provider.metadata().name,
					receiver: source.subscribe(),
				})
			})
			.collect();

		let results = join_all(capabilities.iter().map(|cap| async move {
			let result = match cap.provider.lifecycle() {
				Some(lifecycle) => lifecycle.init(context).await,
				None => Ok(()),
			};
			(cap, result)
		}))
		.instrument(self.span.clone())
		.await;

		let mut updates = Vec::new();
		let mut failure = None;
		for (cap, result) in results {
			let state = match &result {
				Ok(()) => ProviderState::Ready,
				Err(_) => ProviderState::Error,
			};
			updates.extend(cap.names.iter().map(|name| (name.clone(), state)));

			if let Err(err) = result {
				self.span.in_scope(|| {
					error!(provider = cap.label(), error = %err, "provider failed to initialize")
				});
				failure.get_or_insert(ProviderError::Init {
					provider: cap.label().to_string(),
					source: Box::new(err),
				});
			}
		}

		if let Some(change) = self.aggregator.set_many(updates) {
			let origin = self.names.join(",");
			let event =
				aggregate_event(MULTI_PROVIDER_NAME, change, &origin, MULTI_PROVIDER_NAME, None);
			if let Some(event) = event {
				self.forwarder.publish(event);
			}
		}
		self.forwarder.start(bindings).await;

		match failure {
			Some(err) => Err(err),
			None => {
				self.span.in_scope(|| {
					info!(capabilities = capabilities.len(), "multi-provider initialized")
				});
				Ok(())
			}
		}
	}

	/// Stops forwarding, shuts down each distinct capability once, and closes
	/// the outbound event stream.
	async fn shutdown(&self) {
		if self.is_shut_down() {
			debug!("multi-provider already shut down");
			return;
		}
		self.cancel.cancel();
		self.forwarder.stop().await;

		let released: Vec<Arc<dyn FeatureProvider>> = self
			.bindings
			.iter()
			.filter_map(|id| self.registry.release(*id))
			.collect();
		join_all(released.iter().map(|provider| async move {
			if let Some(lifecycle) = provider.lifecycle() {
				lifecycle.shutdown().await;
			}
		}))
		.await;

		self.aggregator.reset();
		self.forwarder.close();
		self.span.in_scope(|| info!(capabilities = released.len(), "multi-provider shut down"));
	}

	fn status(&self) -> ProviderState {
		self.aggregator.aggregate()
	}
}

impl EventSource for MultiProvider {
	fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
		self.forwarder.subscribe()
	}
}

impl Tracker for MultiProvider {
	/// Forwards to every distinct tracking capability among the named
	/// providers.
	fn track(&self, event_name: &str, context: &FlattenedContext, details: &TrackingEventDetails) {
		let _entered = self.span.enter();
		for cap in self.registry.capabilities() {
			if cap.names.is_empty() {
				continue;
			}
			if let Some(tracker) = cap.provider.tracker() {
				tracker.track(event_name, context, details);
			}
		}
	}
}
