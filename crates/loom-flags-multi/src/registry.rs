// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reference-counted registry of provider capabilities.
//!
//! One capability instance may be bound under several names (and as the
//! comparison fallback). Lifecycle work is keyed by instance identity so each
//! distinct capability is initialized, forwarded and shut down once.

use std::collections::HashMap;
use std::sync::Arc;

use loom_flags_provider::FeatureProvider;
use parking_lot::Mutex;
use tracing::trace;

/// Identity of a capability instance (its `Arc` data pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityId(usize);

impl CapabilityId {
	pub fn of(provider: &Arc<dyn FeatureProvider>) -> Self {
		Self(Arc::as_ptr(provider) as *const () as usize)
	}
}

/// A distinct capability and every name it is bound under.
#[derive(Clone)]
pub struct Capability {
	pub id: CapabilityId,
	pub provider: Arc<dyn FeatureProvider>,
	/// Handle names, in binding order. Empty for a capability that is only
	/// bound as the fallback.
	pub names: Vec<String>,
}

impl Capability {
	/// Name used when reporting on this capability.
	pub fn label(&self) -> &str {
		self.names
			.first()
			.map(String::as_str)
			.unwrap_or(crate::metadata::FALLBACK_PROVIDER)
	}
}

struct Entry {
	capability: Capability,
	refs: usize,
}

#[derive(Default)]
struct Inner {
	entries: HashMap<CapabilityId, Entry>,
	order: Vec<CapabilityId>,
}

#[derive(Default)]
pub struct CapabilityRegistry {
	inner: Mutex<Inner>,
}

impl CapabilityRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Binds `provider` under `name` (or anonymously when `None`) and takes
	/// one reference on it.
	pub fn acquire(&self, name: Option<&str>, provider: &Arc<dyn FeatureProvider>) -> CapabilityId {
		let id = CapabilityId::of(provider);
		let mut inner = self.inner.lock();
		if !inner.entries.contains_key(&id) {
			inner.order.push(id);
		}
		let entry = inner.entries.entry(id).or_insert_with(|| Entry {
			capability: Capability {
				id,
				provider: Arc::clone(provider),
				names: Vec::new(),
			},
			refs: 0,
		});
		entry.refs += 1;
		if let Some(name) = name {
			entry.capability.names.push(name.to_string());
		}
		trace!(capability = ?id, refs = entry.refs, "capability acquired");
		id
	}

	/// Drops one reference. Returns the provider once the last reference is
	/// gone; the caller owns its shutdown.
	pub fn release(&self, id: CapabilityId) -> Option<Arc<dyn FeatureProvider>> {
		let mut inner = self.inner.lock();
		let entry = inner.entries.get_mut(&id)?;
		entry.refs -= 1;
		trace!(capability = ?id, refs = entry.refs, "capability released");
		if entry.refs > 0 {
			return None;
		}
		let entry = inner.entries.remove(&id)?;
		inner.order.retain(|other| *other != id);
		Some(entry.capability.provider)
	}

	/// Distinct live capabilities in first-binding order.
	pub fn capabilities(&self) -> Vec<Capability> {
		let inner = self.inner.lock();
		inner
			.order
			.iter()
			.filter_map(|id| inner.entries.get(id))
			.map(|entry| entry.capability.clone())
			.collect()
	}

	pub fn refs(&self, id: CapabilityId) -> usize {
		self.inner.lock().entries.get(&id).map_or(0, |e| e.refs)
	}

	pub fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
