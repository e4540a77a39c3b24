// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! KV key layout.
//!
//! Every key starts with the kind tag, optionally preceded by `{tenant}:`.
//! The layout is shared with every running worker, so changing a format here
//! orphans in-flight jobs.

use syncfence_core::{JobKind, ResourceId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpace {
	tenant: Option<String>,
}

impl KeySpace {
	pub fn new(tenant: Option<String>) -> Self {
		Self {
			tenant: tenant.filter(|t| !t.is_empty()),
		}
	}

	pub fn tenant(&self) -> Option<&str> {
		self.tenant.as_deref()
	}

	fn scoped(&self, key: String) -> String {
		match &self.tenant {
			Some(tenant) => format!("{tenant}:{key}"),
			None => key,
		}
	}

	pub fn fence(&self, kind: JobKind, id: ResourceId) -> String {
		self.scoped(format!("{}_fence_{id}", kind.tag()))
	}

	pub fn taskset(&self, kind: JobKind, id: ResourceId) -> String {
		self.scoped(format!("{}_taskset_{id}", kind.tag()))
	}

	pub fn generator_progress(&self, kind: JobKind, id: ResourceId) -> String {
		self.scoped(format!("{}_generator_progress_{id}", kind.tag()))
	}

	pub fn generator_complete(&self, kind: JobKind, id: ResourceId) -> String {
		self.scoped(format!("{}_generator_complete_{id}", kind.tag()))
	}

	pub fn beat_lock(&self, kind: JobKind) -> String {
		self.scoped(format!("{}_beat_lock", kind.tag()))
	}

	/// Serializes admission across every resource of an exclusive kind.
	pub fn kind_starter_lock(&self, kind: JobKind) -> String {
		self.scoped(format!("{}_starter_lock", kind.tag()))
	}

	pub fn starter_lock(&self, kind: JobKind, id: ResourceId) -> String {
		self.scoped(format!("{}_starter_lock_{id}", kind.tag()))
	}

	pub fn generator_lock(&self, kind: JobKind, id: ResourceId) -> String {
		self.scoped(format!("{}_generator_lock_{id}", kind.tag()))
	}

	pub fn stop_fence(&self, kind: JobKind, id: ResourceId) -> String {
		self.scoped(format!("{}_stop_fence_{id}", kind.tag()))
	}

	/// Prefix shared by every fence key of `kind`.
	pub fn fence_prefix(&self, kind: JobKind) -> String {
		self.scoped(format!("{}_fence_", kind.tag()))
	}

	/// Recover the resource id from a key produced by [`KeySpace::fence`].
	pub fn resource_from_fence_key(&self, kind: JobKind, key: &str) -> Option<ResourceId> {
		key.strip_prefix(&self.fence_prefix(kind))?
			.parse::<ResourceId>()
			.ok()
	}
}
