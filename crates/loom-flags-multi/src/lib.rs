// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Multi-provider feature flag orchestration for Loom.
//!
//! [`MultiProvider`] evaluates a flag against several independently
//! implemented providers and returns one typed result. It implements the
//! same provider contract as its children, so it can be used anywhere a single
//! provider is expected.
//!
//! # Features
//!
//! - **Strategies**: sequential [`FirstMatch`], racing [`FirstSuccess`] with a
//!   timeout, and [`Comparison`] with a fallback provider
//! - **State aggregation**: one health state, worst provider wins
//! - **Event forwarding**: child event streams merged into one, debounced on
//!   aggregate changes
//! - **Hook isolation**: each provider's hooks see only their own context
//! - **Shared providers**: one instance may be registered under several names
//!   and is still initialized and shut down once
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use loom_flags_multi::{MultiProvider, StrategyKind};
//! use loom_flags_provider::{
//!     EvaluationContext, FeatureProvider, FlagValue, InMemoryFlag, InMemoryProvider, Lifecycle,
//! };
//!
//! # tokio_test::block_on(async {
//! let primary = InMemoryProvider::new("primary");
//! let defaults = InMemoryProvider::new("defaults")
//!     .with_flag("checkout.new_flow", InMemoryFlag::constant("on", FlagValue::Bool(true)));
//!
//! let multi = MultiProvider::builder()
//!     .provider("primary", Arc::new(primary))
//!     .provider("defaults", Arc::new(defaults))
//!     .strategy(StrategyKind::FirstMatch)
//!     .build()?;
//!
//! multi.init(&EvaluationContext::default()).await?;
//!
//! let ctx = EvaluationContext::new("user-123").flatten();
//! let detail = multi.resolve_bool("checkout.new_flow", false, &ctx).await;
//! assert!(*detail.value());
//!
//! multi.shutdown().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod isolation;
pub mod metadata;
pub mod provider;
pub mod registry;
pub mod state;
pub mod strategy;

pub use config::{
	load_config, load_config_from_env, load_config_with_file, ConfigSource, DefaultsSource,
	EnvSource, MultiProviderConfig, MultiProviderConfigLayer, Precedence, TomlSource,
};
pub use error::{aggregate_errors, ConfigError, EvaluationError, MultiProviderError, Result};
pub use events::{EventBinding, EventForwarder};
pub use isolation::HookIsolator;
pub use provider::{MultiProvider, MultiProviderBuilder, MULTI_PROVIDER_NAME};
pub use registry::{Capability, CapabilityId, CapabilityRegistry};
pub use state::{SeverityTable, StateAggregator, StateChange};
pub use strategy::{
	Comparator, Comparison, EvaluationStrategy, FirstMatch, FirstSuccess, StrategyKind,
	DEFAULT_FIRST_SUCCESS_TIMEOUT,
};
