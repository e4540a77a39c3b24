// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Capabilities the sync jobs consume from the host product.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use syncfence_core::{ExternalGroup, JobKind, Resource, ResourceId};
use thiserror::Error;

use crate::error::Result;

/// Persistent resource state.
#[async_trait]
pub trait ResourceStore: Send + Sync {
	/// Every resource the kind operates on, with the kind's own last-synced time.
	async fn list_resources(&self, kind: JobKind) -> Result<Vec<Resource>>;

	async fn get_resource(&self, kind: JobKind, id: ResourceId) -> Result<Option<Resource>>;

	/// Record a completed job. For connector deletion this removes the
	/// resource; for document sets it clears `needs_sync`.
	async fn mark_resource_synced(&self, kind: JobKind, id: ResourceId, at: DateTime<Utc>) -> Result<()>;
}

/// What the external source currently holds.
#[async_trait]
pub trait ConnectorSource: Send + Sync {
	async fn enumerate_current_ids(&self, resource: &Resource) -> Result<HashSet<String>>;

	async fn enumerate_external_groups(&self, resource: &Resource) -> Result<Vec<ExternalGroup>>;
}

/// Indexed documents and the per-subtask writes against them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
	/// Documents the resource contributed (cc_pairs) or contains (document sets).
	async fn document_ids(&self, kind: JobKind, resource: &Resource) -> Result<HashSet<String>>;

	/// Apply one subtask's effect in a single transaction.
	async fn apply_subtask_effect(
		&self,
		kind: JobKind,
		resource_id: ResourceId,
		effect: &SubtaskEffect,
	) -> std::result::Result<(), EffectError>;

	/// Degraded path once retries are spent: drop the resource's contribution
	/// to the item and flag it for out-of-band reconciliation.
	async fn remove_contribution_and_mark_dirty(
		&self,
		kind: JobKind,
		resource_id: ResourceId,
		effect: &SubtaskEffect,
	) -> std::result::Result<(), EffectError>;
}

/// The three collaborators, bundled for injection.
#[derive(Clone)]
pub struct Collaborators {
	pub resources: Arc<dyn ResourceStore>,
	pub connectors: Arc<dyn ConnectorSource>,
	pub documents: Arc<dyn DocumentStore>,
}

/// One subtask's unit of work. Travels in the subtask kwargs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubtaskEffect {
	RemoveDocument { document_id: String },
	UpsertExternalGroup { group: ExternalGroup },
	SyncDocumentSetMembership { document_id: String },
}

impl SubtaskEffect {
	/// The document or group the effect touches.
	pub fn item_id(&self) -> &str {
		match self {
			SubtaskEffect::RemoveDocument { document_id }
			| SubtaskEffect::SyncDocumentSetMembership { document_id } => document_id,
			SubtaskEffect::UpsertExternalGroup { group } => &group.id,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
	#[error("transient error: {0}")]
	Transient(String),

	#[error("timed out: {0}")]
	Timeout(String),

	#[error("http {status}: {message}")]
	Http { status: u16, message: String },

	#[error("non-retryable error: {0}")]
	NonRetryable(String),
}

impl EffectError {
	pub fn is_retryable(&self) -> bool {
		match self {
			EffectError::Transient(_) | EffectError::Timeout(_) => true,
			EffectError::Http { status, .. } => *status >= 500 || *status == 429,
			EffectError::NonRetryable(_) => false,
		}
	}
}
