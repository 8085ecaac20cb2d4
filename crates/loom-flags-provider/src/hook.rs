// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation hooks.
//!
//! A [`Hook`] observes a single provider evaluation through four stages:
//!
//! | Stage | When | May |
//! |-------|------|-----|
//! | `before` | before the provider is called | propose an [`EvaluationContext`] |
//! | `after` | after a successful resolution | fail, which triggers `error` |
//! | `error` | after a provider or hook failure | observe only |
//! | `finally` | always, last | observe only |

use std::collections::HashMap;

use async_trait::async_trait;

use crate::context::EvaluationContext;
use crate::error::{HookError, ResolutionError};
use crate::provider::ProviderMetadata;
use crate::resolution::ResolutionDetail;
use crate::value::{FlagType, FlagValue};

/// Free-form hints passed to every hook stage.
pub type HookHints = HashMap<String, serde_json::Value>;

/// Metadata about the client that issued the evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMetadata {
	pub domain: Option<String>,
}

impl ClientMetadata {
	pub fn new(domain: impl Into<String>) -> Self {
		Self {
			domain: Some(domain.into()),
		}
	}
}

/// Everything a hook knows about the evaluation it is observing.
#[derive(Debug, Clone, PartialEq)]
pub struct HookContext {
	pub flag_key: String,
	pub flag_type: FlagType,
	pub default_value: FlagValue,
	pub client_metadata: ClientMetadata,
	pub provider_metadata: ProviderMetadata,
	pub evaluation_context: EvaluationContext,
}

#[async_trait]
pub trait Hook: Send + Sync + 'static {
	/// Name used in logs and hook errors.
	fn name(&self) -> &str {
		std::any::type_name::<Self>()
	}

	async fn before(
		&self,
		_ctx: &HookContext,
		_hints: &HookHints,
	) -> Result<Option<EvaluationContext>, HookError> {
		Ok(None)
	}

	async fn after(
		&self,
		_ctx: &HookContext,
		_details: &ResolutionDetail<FlagValue>,
		_hints: &HookHints,
	) -> Result<(), HookError> {
		Ok(())
	}

	async fn error(&self, _ctx: &HookContext, _error: &ResolutionError, _hints: &HookHints) {}

	async fn finally(
		&self,
		_ctx: &HookContext,
		_details: &ResolutionDetail<FlagValue>,
		_hints: &HookHints,
	) {
	}
}
