// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cross-provider health aggregation.
//!
//! The aggregate is the worst state across providers by severity
//! `Ready < Stale < Error`. Providers that are still `NotReady` do not take
//! part; the aggregate is `NotReady` only while no provider has reported.
//! Updates report a [`StateChange`] only when the aggregate moves, which
//! debounces storms of individual transitions.

use std::collections::BTreeMap;

use loom_flags_provider::{ProviderEvent, ProviderEventType, ProviderState};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Severity order and event-to-state mapping used by [`StateAggregator`].
#[derive(Debug, Clone)]
pub struct SeverityTable {
	severities: [(ProviderState, u8); 3],
	transitions: [(ProviderEventType, ProviderState); 3],
}

impl SeverityTable {
	pub fn new() -> Self {
		Self {
			severities: [
				(ProviderState::Ready, 0),
				(ProviderState::Stale, 1),
				(ProviderState::Error, 2),
			],
			transitions: [
				(ProviderEventType::Ready, ProviderState::Ready),
				(ProviderEventType::Stale, ProviderState::Stale),
				(ProviderEventType::Error, ProviderState::Error),
			],
		}
	}

	/// `None` for states outside the reduction (`NotReady`).
	pub fn severity(&self, state: ProviderState) -> Option<u8> {
		self.severities
			.iter()
			.find(|(s, _)| *s == state)
			.map(|(_, severity)| *severity)
	}

	/// `None` for events that do not change state (`ConfigChange`).
	pub fn state_for(&self, event: ProviderEventType) -> Option<ProviderState> {
		self.transitions
			.iter()
			.find(|(e, _)| *e == event)
			.map(|(_, state)| *state)
	}

	/// Worst state among `states`, ignoring those without a severity.
	pub fn worst(&self, states: impl IntoIterator<Item = ProviderState>) -> ProviderState {
		states
			.into_iter()
			.filter_map(|state| self.severity(state).map(|severity| (severity, state)))
			.max_by_key(|(severity, _)| *severity)
			.map_or(ProviderState::NotReady, |(_, state)| state)
	}
}

impl Default for SeverityTable {
	fn default() -> Self {
		Self::new()
	}
}

/// A move of the aggregate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
	pub previous: ProviderState,
	pub current: ProviderState,
}

struct Inner {
	states: BTreeMap<String, ProviderState>,
	aggregate: ProviderState,
}

pub struct StateAggregator {
	table: SeverityTable,
	inner: Mutex<Inner>,
}

impl StateAggregator {
	pub fn new(names: impl IntoIterator<Item = String>) -> Self {
		Self::with_table(names, SeverityTable::new())
	}

	pub fn with_table(names: impl IntoIterator<Item = String>, table: SeverityTable) -> Self {
		let states = names
			.into_iter()
			.map(|name| (name, ProviderState::NotReady))
			.collect();
		Self {
			table,
			inner: Mutex::new(Inner {
				states,
				aggregate: ProviderState::NotReady,
			}),
		}
	}

	pub fn table(&self) -> &SeverityTable {
		&self.table
	}

	/// Applies a provider event. `ConfigChange` is logged and never moves the
	/// aggregate.
	pub fn apply(&self, event: &ProviderEvent) -> Option<StateChange> {
		match self.table.state_for(event.event_type) {
			Some(state) => self.set(&event.provider_name, state),
			None => {
				debug!(
					provider = %event.provider_name,
					flags = event.flags_changed.len(),
					"configuration changed"
				);
				None
			}
		}
	}

	pub fn set(&self, name: &str, state: ProviderState) -> Option<StateChange> {
		self.set_many([(name.to_string(), state)])
	}

	/// Applies several updates and recomputes once.
	pub fn set_many(
		&self,
		updates: impl IntoIterator<Item = (String, ProviderState)>,
	) -> Option<StateChange> {
		let mut inner = self.inner.lock();
		for (name, state) in updates {
			match inner.states.get_mut(&name) {
				Some(entry) => *entry = state,
				None => warn!(provider = %name, "state update for unknown provider ignored"),
			}
		}
		self.recompute(&mut inner)
	}

	/// Returns every entry and the aggregate to `NotReady`.
	pub fn reset(&self) -> Option<StateChange> {
		let mut inner = self.inner.lock();
		for state in inner.states.values_mut() {
			*state = ProviderState::NotReady;
		}
		self.recompute(&mut inner)
	}

	pub fn aggregate(&self) -> ProviderState {
		self.inner.lock().aggregate
	}

	pub fn state_of(&self, name: &str) -> Option<ProviderState> {
		self.inner.lock().states.get(name).copied()
	}

	pub fn snapshot(&self) -> BTreeMap<String, ProviderState> {
		self.inner.lock().states.clone()
	}

	fn recompute(&self, inner: &mut Inner) -> Option<StateChange> {
		let previous = inner.aggregate;
		let current = self.table.worst(inner.states.values().copied());
		if current == previous {
			return None;
		}
		inner.aggregate = current;
		debug!(%previous, %current, "aggregate provider state changed");
		Some(StateChange { previous, current })
	}
}
