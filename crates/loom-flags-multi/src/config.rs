// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered multi-provider configuration.
//!
//! Precedence (highest to lowest):
//! 1. Environment variables (`LOOM_FLAGS_MULTI_*`)
//! 2. Config file ([`TomlSource::SYSTEM_PATH`] by default)
//! 3. Built-in defaults
//!
//! Providers themselves are code, not configuration; the file and environment
//! only choose the strategy and its tunables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::ConfigError;
use crate::strategy::{StrategyKind, DEFAULT_FIRST_SUCCESS_TIMEOUT};

pub const DEFAULT_EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MultiProviderConfigLayer {
	pub strategy: Option<StrategyKind>,
	pub first_success_timeout_ms: Option<u64>,
	pub event_buffer: Option<usize>,
	pub client_domain: Option<String>,
}

impl MultiProviderConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.strategy.is_some() {
			self.strategy = other.strategy;
		}
		if other.first_success_timeout_ms.is_some() {
			self.first_success_timeout_ms = other.first_success_timeout_ms;
		}
		if other.event_buffer.is_some() {
			self.event_buffer = other.event_buffer;
		}
		if other.client_domain.is_some() {
			self.client_domain = other.client_domain;
		}
	}

	/// Checks the strategy-specific fields of one source's layer. `key` maps a
	/// field name to how the source spells it in errors.
	pub fn validate(&self, key: impl Fn(&str) -> String) -> Result<(), ConfigError> {
		if self.strategy == Some(StrategyKind::Custom) {
			return Err(ConfigError::InvalidValue {
				key: key("strategy"),
				message: "custom strategies are supplied in code, not configuration".to_string(),
			});
		}
		if self.first_success_timeout_ms == Some(0) {
			return Err(ConfigError::InvalidValue {
				key: key("first_success_timeout_ms"),
				message: "must be greater than zero".to_string(),
			});
		}
		if let (Some(strategy), Some(_)) = (self.strategy, self.first_success_timeout_ms) {
			if strategy != StrategyKind::FirstSuccess {
				warn!(
					%strategy,
					key = %key("first_success_timeout_ms"),
					"timeout only applies to the first-success strategy"
				);
			}
		}
		Ok(())
	}

	pub fn finalize(self) -> Result<MultiProviderConfig, ConfigError> {
		let timeout_ms = self
			.first_success_timeout_ms
			.unwrap_or(DEFAULT_FIRST_SUCCESS_TIMEOUT.as_millis() as u64);
		if timeout_ms == 0 {
			return Err(ConfigError::InvalidValue {
				key: "first_success_timeout_ms".to_string(),
				message: "must be greater than zero".to_string(),
			});
		}

		let event_buffer = self.event_buffer.unwrap_or(DEFAULT_EVENT_BUFFER);
		if event_buffer == 0 {
			return Err(ConfigError::InvalidValue {
				key: "event_buffer".to_string(),
				message: "must be greater than zero".to_string(),
			});
		}

		Ok(MultiProviderConfig {
			strategy: self.strategy.unwrap_or_default(),
			first_success_timeout: Duration::from_millis(timeout_ms),
			event_buffer,
			client_domain: self.client_domain,
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiProviderConfig {
	pub strategy: StrategyKind,
	pub first_success_timeout: Duration,
	pub event_buffer: usize,
	pub client_domain: Option<String>,
}

impl Default for MultiProviderConfig {
	fn default() -> Self {
		Self {
			strategy: StrategyKind::FirstMatch,
			first_success_timeout: DEFAULT_FIRST_SUCCESS_TIMEOUT,
			event_buffer: DEFAULT_EVENT_BUFFER,
			client_domain: None,
		}
	}
}

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<MultiProviderConfigLayer, ConfigError>;
}

/// Built-in defaults, spelled out so the merged layer always names every
/// tunable.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<MultiProviderConfigLayer, ConfigError> {
		Ok(MultiProviderConfigLayer {
			strategy: Some(StrategyKind::default()),
			first_success_timeout_ms: Some(DEFAULT_FIRST_SUCCESS_TIMEOUT.as_millis() as u64),
			event_buffer: Some(DEFAULT_EVENT_BUFFER),
			client_domain: None,
		})
	}
}

/// Optional TOML file. A missing file contributes nothing.
///
/// ```toml
/// strategy = "first-success"
/// first_success_timeout_ms = 250
/// event_buffer = 128
/// client_domain = "checkout"
/// ```
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub const SYSTEM_PATH: &'static str = "/etc/loom/flags-multi.toml";

	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new(Self::SYSTEM_PATH)
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<MultiProviderConfigLayer, ConfigError> {
		let content = match std::fs::read_to_string(&self.path) {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				trace!(path = %self.path.display(), "no multi-provider config file");
				return Ok(MultiProviderConfigLayer::default());
			}
			Err(source) => {
				return Err(ConfigError::FileRead {
					path: self.path.clone(),
					source,
				})
			}
		};

		let layer: MultiProviderConfigLayer =
			toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
				path: self.path.clone(),
				source,
			})?;
		layer.validate(|field| format!("{}: {field}", self.path.display()))?;

		debug!(
			path = %self.path.display(),
			strategy = ?layer.strategy,
			"multi-provider config file read"
		);
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Recognized: `LOOM_FLAGS_MULTI_STRATEGY`, `LOOM_FLAGS_MULTI_TIMEOUT_MS`,
/// `LOOM_FLAGS_MULTI_EVENT_BUFFER`, `LOOM_FLAGS_MULTI_CLIENT_DOMAIN`.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<MultiProviderConfigLayer, ConfigError> {
		debug!("loading environment variables");
		layer_from_lookup(|name| std::env::var(name).ok())
	}
}

fn layer_from_lookup(
	lookup: impl Fn(&str) -> Option<String>,
) -> Result<MultiProviderConfigLayer, ConfigError> {
	let var = |name: &str| lookup(name).filter(|s| !s.is_empty());

	let strategy = match var("LOOM_FLAGS_MULTI_STRATEGY") {
		Some(v) => Some(v.parse::<StrategyKind>().map_err(|e| ConfigError::InvalidValue {
			key: "LOOM_FLAGS_MULTI_STRATEGY".to_string(),
			message: e.to_string(),
		})?),
		None => None,
	};

	let layer = MultiProviderConfigLayer {
		strategy,
		first_success_timeout_ms: parse_number(&var, "LOOM_FLAGS_MULTI_TIMEOUT_MS")?,
		event_buffer: parse_number(&var, "LOOM_FLAGS_MULTI_EVENT_BUFFER")?,
		client_domain: var("LOOM_FLAGS_MULTI_CLIENT_DOMAIN"),
	};
	layer.validate(|field| match field {
		"strategy" => "LOOM_FLAGS_MULTI_STRATEGY".to_string(),
		"first_success_timeout_ms" => "LOOM_FLAGS_MULTI_TIMEOUT_MS".to_string(),
		other => other.to_string(),
	})?;
	Ok(layer)
}

fn parse_number<T: std::str::FromStr>(
	var: &impl Fn(&str) -> Option<String>,
	name: &str,
) -> Result<Option<T>, ConfigError> {
	match var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid number '{v}'"),
		}),
		None => Ok(None),
	}
}

fn load_from(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<MultiProviderConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = MultiProviderConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	let config = merged.finalize()?;
	info!(
		strategy = %config.strategy,
		first_success_timeout_ms = config.first_success_timeout.as_millis() as u64,
		event_buffer = config.event_buffer,
		"multi-provider configuration loaded"
	);
	Ok(config)
}

/// Load configuration from all sources with standard precedence.
pub fn load_config() -> Result<MultiProviderConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<PathBuf>,
) -> Result<MultiProviderConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only.
pub fn load_config_from_env() -> Result<MultiProviderConfig, ConfigError> {
	load_from(vec![Box::new(DefaultsSource), Box::new(EnvSource)])
}
