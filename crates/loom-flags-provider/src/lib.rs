// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flag provider contract for Loom.
//!
//! This crate defines what a flag backend ("provider") must implement to take
//! part in evaluation, together with the shared resolution model. It is used by
//! the multi-provider orchestrator (`loom-flags-multi`) and by provider
//! implementations.
//!
//! # Overview
//!
//! - [`FeatureProvider`]: typed evaluation for bool, string, int, float and
//!   object flags
//! - Optional capabilities: [`Lifecycle`], [`EventSource`], [`Tracker`]
//! - [`ResolutionDetail`]: value, variant, [`Reason`], error and metadata
//! - [`EvaluationContext`] and its provider-facing [`FlattenedContext`]
//! - [`Hook`]: before/after/error/finally evaluation hooks
//! - [`InMemoryProvider`]: a map-backed provider for tests and local overrides
//!
//! # Example
//!
//! ```
//! use loom_flags_provider::{
//!     EvaluationContext, FeatureProvider, FlagValue, InMemoryFlag, InMemoryProvider, Reason,
//! };
//!
//! # tokio_test::block_on(async {
//! let provider = InMemoryProvider::new("local")
//!     .with_flag("checkout.new_flow", InMemoryFlag::constant("on", FlagValue::Bool(true)));
//!
//! let ctx = EvaluationContext::new("user-123").flatten();
//! let detail = provider.resolve_bool("checkout.new_flow", false, &ctx).await;
//! assert!(*detail.value());
//! assert_eq!(detail.reason(), Reason::Static);
//! # });
//! ```

pub mod context;
pub mod error;
pub mod event;
pub mod hook;
pub mod memory;
pub mod provider;
pub mod resolution;
pub mod value;

pub use context::{EvaluationContext, FlattenedContext, TARGETING_KEY};
pub use error::{ErrorCode, HookError, ProviderError, ResolutionError, Result};
pub use event::{ProviderEvent, ProviderEventType};
pub use hook::{ClientMetadata, Hook, HookContext, HookHints};
pub use memory::{InMemoryFlag, InMemoryProvider};
pub use provider::{
	into_typed, resolve_value, EventSource, FeatureProvider, Lifecycle, ProviderMetadata,
	ProviderState, Tracker, TrackingEventDetails,
};
pub use resolution::{FlagMetadata, MetadataValue, Reason, ResolutionDetail};
pub use value::{FlagKind, FlagType, FlagValue};
