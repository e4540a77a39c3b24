// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite catalog implementing all three collaborators.
//!
//! Resources and their per-kind sync history, the documents each cc_pair
//! contributed, document-set membership and a snapshot of the external source
//! all live in one database. Timestamps are RFC3339 text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use syncfence_core::{ExternalGroup, JobKind, Resource, ResourceId, ResourceStatus, ResourceType};

use crate::collaborators::{Collaborators, ConnectorSource, DocumentStore, EffectError, ResourceStore, SubtaskEffect};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyItem {
	pub kind: JobKind,
	pub resource_id: ResourceId,
	pub item_id: String,
	pub marked_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SqliteCatalog {
	pool: SqlitePool,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(raw)
		.map(|t| t.with_timezone(&Utc))
		.map_err(|e| SyncError::Collaborator(format!("invalid timestamp {raw:?}: {e}")))
}

fn effect_error(e: sqlx::Error) -> EffectError {
	match &e {
		sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => EffectError::Timeout(e.to_string()),
		_ => EffectError::Transient(e.to_string()),
	}
}

fn row_to_resource(row: &sqlx::sqlite::SqliteRow) -> Result<Resource> {
	let resource_type: String = row.try_get("resource_type")?;
	let status: String = row.try_get("status")?;
	let created_at: String = row.try_get("created_at")?;
	let last_synced_at: Option<String> = row.try_get("last_synced_at")?;
	let sync_period_secs: Option<i64> = row.try_get("sync_period_secs")?;
	let needs_sync: bool = row.try_get("needs_sync")?;

	Ok(Resource {
		id: ResourceId(row.try_get("id")?),
		resource_type: resource_type.parse()?,
		status: status.parse()?,
		created_at: parse_time(&created_at)?,
		last_synced_at: last_synced_at.as_deref().map(parse_time).transpose()?,
		sync_period_secs: sync_period_secs.and_then(|s| u64::try_from(s).ok()),
		needs_sync,
	})
}

fn row_to_group(row: &sqlx::sqlite::SqliteRow) -> Result<ExternalGroup> {
	let members: String = row.try_get("member_emails")?;
	Ok(ExternalGroup {
		id: row.try_get("group_id")?,
		member_emails: serde_json::from_str(&members)?,
	})
}

fn row_to_dirty(row: &sqlx::sqlite::SqliteRow) -> Result<DirtyItem> {
	let kind: String = row.try_get("kind")?;
	let marked_at: String = row.try_get("marked_at")?;
	Ok(DirtyItem {
		kind: JobKind::from_tag(&kind)
			.ok_or_else(|| SyncError::Collaborator(format!("unknown kind {kind:?}")))?,
		resource_id: ResourceId(row.try_get("resource_id")?),
		item_id: row.try_get("item_id")?,
		marked_at: parse_time(&marked_at)?,
	})
}

impl SqliteCatalog {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub fn collaborators(self: &Arc<Self>) -> Collaborators {
		Collaborators {
			resources: self.clone(),
			connectors: self.clone(),
			documents: self.clone(),
		}
	}

	#[instrument(skip(self))]
	pub async fn ensure_schema(&self) -> Result<()> {
		let statements = [
			r#"
			CREATE TABLE IF NOT EXISTS sync_resources (
				id INTEGER NOT NULL,
				resource_type TEXT NOT NULL,
				status TEXT NOT NULL,
				created_at TEXT NOT NULL,
				sync_period_secs INTEGER,
				needs_sync INTEGER NOT NULL DEFAULT 0,
				PRIMARY KEY (resource_type, id)
			)
			"#,
			r#"
			CREATE TABLE IF NOT EXISTS sync_history (
				kind TEXT NOT NULL,
				resource_id INTEGER NOT NULL,
				last_synced_at TEXT NOT NULL,
				PRIMARY KEY (kind, resource_id)
			)
			"#,
			r#"
			CREATE TABLE IF NOT EXISTS documents (
				id TEXT NOT NULL,
				cc_pair_id INTEGER NOT NULL,
				PRIMARY KEY (id, cc_pair_id)
			)
			"#,
			r#"
			CREATE TABLE IF NOT EXISTS document_set_members (
				document_set_id INTEGER NOT NULL,
				document_id TEXT NOT NULL,
				synced_at TEXT,
				PRIMARY KEY (document_set_id, document_id)
			)
			"#,
			r#"
			CREATE TABLE IF NOT EXISTS external_snapshot (
				cc_pair_id INTEGER NOT NULL,
				document_id TEXT NOT NULL,
				PRIMARY KEY (cc_pair_id, document_id)
			)
			"#,
			r#"
			CREATE TABLE IF NOT EXISTS external_groups_source (
				cc_pair_id INTEGER NOT NULL,
				group_id TEXT NOT NULL,
				member_emails TEXT NOT NULL,
				PRIMARY KEY (cc_pair_id, group_id)
			)
			"#,
			r#"
			CREATE TABLE IF NOT EXISTS user_groups (
				cc_pair_id INTEGER NOT NULL,
				group_id TEXT NOT NULL,
				member_emails TEXT NOT NULL,
				updated_at TEXT NOT NULL,
				PRIMARY KEY (cc_pair_id, group_id)
			)
			"#,
			r#"
			CREATE TABLE IF NOT EXISTS dirty_documents (
				kind TEXT NOT NULL,
				resource_id INTEGER NOT NULL,
				item_id TEXT NOT NULL,
				marked_at TEXT NOT NULL,
				PRIMARY KEY (kind, resource_id, item_id)
			)
			"#,
		];
		for statement in statements {
			sqlx::query(statement).execute(&self.pool).await?;
		}
		debug!("catalog schema ready");
		Ok(())
	}

	pub async fn upsert_resource(&self, resource: &Resource) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO sync_resources (id, resource_type, status, created_at, sync_period_secs, needs_sync)
			VALUES (?, ?, ?, ?, ?, ?)
			ON CONFLICT (resource_type, id) DO UPDATE SET
				status = excluded.status,
				sync_period_secs = excluded.sync_period_secs,
				needs_sync = excluded.needs_sync
			"#,
		)
		.bind(resource.id.0)
		.bind(resource.resource_type.as_str())
		.bind(resource.status.as_str())
		.bind(resource.created_at.to_rfc3339())
		.bind(resource.sync_period_secs.and_then(|s| i64::try_from(s).ok()))
		.bind(resource.needs_sync)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	pub async fn set_status(&self, resource_type: ResourceType, id: ResourceId, status: ResourceStatus) -> Result<()> {
		sqlx::query("UPDATE sync_resources SET status = ? WHERE resource_type = ? AND id = ?")
			.bind(status.as_str())
			.bind(resource_type.as_str())
			.bind(id.0)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	pub async fn add_documents(&self, cc_pair: ResourceId, ids: &[&str]) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		for id in ids {
			sqlx::query("INSERT OR IGNORE INTO documents (id, cc_pair_id) VALUES (?, ?)")
				.bind(*id)
				.bind(cc_pair.0)
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;
		Ok(())
	}

	/// Replace the external source's view of a cc_pair's documents.
	pub async fn set_source_ids(&self, cc_pair: ResourceId, ids: &[&str]) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		sqlx::query("DELETE FROM external_snapshot WHERE cc_pair_id = ?")
			.bind(cc_pair.0)
			.execute(&mut *tx)
			.await?;
		for id in ids {
			sqlx::query("INSERT OR IGNORE INTO external_snapshot (cc_pair_id, document_id) VALUES (?, ?)")
				.bind(cc_pair.0)
				.bind(*id)
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;
		Ok(())
	}

	pub async fn set_source_groups(&self, cc_pair: ResourceId, groups: &[ExternalGroup]) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		sqlx::query("DELETE FROM external_groups_source WHERE cc_pair_id = ?")
			.bind(cc_pair.0)
			.execute(&mut *tx)
			.await?;
		for group in groups {
			sqlx::query(
				"INSERT INTO external_groups_source (cc_pair_id, group_id, member_emails) VALUES (?, ?, ?)",
			)
			.bind(cc_pair.0)
			.bind(&group.id)
			.bind(serde_json::to_string(&group.member_emails)?)
			.execute(&mut *tx)
			.await?;
		}
		tx.commit().await?;
		Ok(())
	}

	pub async fn add_document_set_members(&self, set: ResourceId, ids: &[&str]) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		for id in ids {
			sqlx::query(
				"INSERT OR IGNORE INTO document_set_members (document_set_id, document_id) VALUES (?, ?)",
			)
			.bind(set.0)
			.bind(*id)
			.execute(&mut *tx)
			.await?;
		}
		sqlx::query("UPDATE sync_resources SET needs_sync = 1 WHERE resource_type = ? AND id = ?")
			.bind(ResourceType::DocumentSet.as_str())
			.bind(set.0)
			.execute(&mut *tx)
			.await?;
		tx.commit().await?;
		Ok(())
	}

	pub async fn synced_groups(&self, cc_pair: ResourceId) -> Result<Vec<ExternalGroup>> {
		let rows = sqlx::query(
			"SELECT group_id, member_emails FROM user_groups WHERE cc_pair_id = ? ORDER BY group_id",
		)
		.bind(cc_pair.0)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_group).collect()
	}

	pub async fn dirty_items(&self) -> Result<Vec<DirtyItem>> {
		let rows = sqlx::query(
			"SELECT kind, resource_id, item_id, marked_at FROM dirty_documents ORDER BY marked_at, item_id",
		)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_dirty).collect()
	}

	async fn string_column(&self, sql: &str, id: ResourceId) -> Result<HashSet<String>> {
		let rows: Vec<(String,)> = sqlx::query_as(sql).bind(id.0).fetch_all(&self.pool).await?;
		Ok(rows.into_iter().map(|(s,)| s).collect())
	}
}

#[async_trait]
impl ResourceStore for SqliteCatalog {
	async fn list_resources(&self, kind: JobKind) -> Result<Vec<Resource>> {
		let rows = sqlx::query(
			r#"
			SELECT r.id, r.resource_type, r.status, r.created_at, r.sync_period_secs, r.needs_sync,
				h.last_synced_at
			FROM sync_resources r
			LEFT JOIN sync_history h ON h.resource_id = r.id AND h.kind = ?
			WHERE r.resource_type = ?
			ORDER BY r.id
			"#,
		)
		.bind(kind.tag())
		.bind(kind.resource_type().as_str())
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_resource).collect()
	}

	async fn get_resource(&self, kind: JobKind, id: ResourceId) -> Result<Option<Resource>> {
		let row = sqlx::query(
			r#"
			SELECT r.id, r.resource_type, r.status, r.created_at, r.sync_period_secs, r.needs_sync,
				h.last_synced_at
			FROM sync_resources r
			LEFT JOIN sync_history h ON h.resource_id = r.id AND h.kind = ?
			WHERE r.resource_type = ? AND r.id = ?
			"#,
		)
		.bind(kind.tag())
		.bind(kind.resource_type().as_str())
		.bind(id.0)
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(row_to_resource).transpose()
	}

	#[instrument(skip(self))]
	async fn mark_resource_synced(&self, kind: JobKind, id: ResourceId, at: DateTime<Utc>) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		sqlx::query(
			r#"
			INSERT INTO sync_history (kind, resource_id, last_synced_at) VALUES (?, ?, ?)
			ON CONFLICT (kind, resource_id) DO UPDATE SET last_synced_at = excluded.last_synced_at
			"#,
		)
		.bind(kind.tag())
		.bind(id.0)
		.bind(at.to_rfc3339())
		.execute(&mut *tx)
		.await?;

		match kind {
			JobKind::ConnectorDeletion => {
				sqlx::query("DELETE FROM documents WHERE cc_pair_id = ?")
					.bind(id.0)
					.execute(&mut *tx)
					.await?;
				sqlx::query("DELETE FROM sync_resources WHERE resource_type = ? AND id = ?")
					.bind(kind.resource_type().as_str())
					.bind(id.0)
					.execute(&mut *tx)
					.await?;
			}
			JobKind::DocumentSetSync => {
				sqlx::query("UPDATE sync_resources SET needs_sync = 0 WHERE resource_type = ? AND id = ?")
					.bind(kind.resource_type().as_str())
					.bind(id.0)
					.execute(&mut *tx)
					.await?;
			}
			JobKind::Pruning | JobKind::ExternalGroupSync => {}
		}
		tx.commit().await?;
		Ok(())
	}
}

#[async_trait]
impl ConnectorSource for SqliteCatalog {
	async fn enumerate_current_ids(&self, resource: &Resource) -> Result<HashSet<String>> {
		self.string_column(
			"SELECT document_id FROM external_snapshot WHERE cc_pair_id = ?",
			resource.id,
		)
		.await
	}

	async fn enumerate_external_groups(&self, resource: &Resource) -> Result<Vec<ExternalGroup>> {
		let rows = sqlx::query(
			"SELECT group_id, member_emails FROM external_groups_source WHERE cc_pair_id = ? ORDER BY group_id",
		)
		.bind(resource.id.0)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_group).collect()
	}
}

#[async_trait]
impl DocumentStore for SqliteCatalog {
	async fn document_ids(&self, kind: JobKind, resource: &Resource) -> Result<HashSet<String>> {
		match kind {
			JobKind::Pruning | JobKind::ConnectorDeletion => {
				self.string_column("SELECT id FROM documents WHERE cc_pair_id = ?", resource.id)
					.await
			}
			JobKind::DocumentSetSync => {
				self.string_column(
					"SELECT document_id FROM document_set_members WHERE document_set_id = ?",
					resource.id,
				)
				.await
			}
			JobKind::ExternalGroupSync => Ok(HashSet::new()),
		}
	}

	async fn apply_subtask_effect(
		&self,
		_kind: JobKind,
		resource_id: ResourceId,
		effect: &SubtaskEffect,
	) -> std::result::Result<(), EffectError> {
		let now = Utc::now().to_rfc3339();
		match effect {
			SubtaskEffect::RemoveDocument { document_id } => {
				sqlx::query("DELETE FROM documents WHERE id = ? AND cc_pair_id = ?")
					.bind(document_id)
					.bind(resource_id.0)
					.execute(&self.pool)
					.await
					.map_err(effect_error)?;
			}
			SubtaskEffect::UpsertExternalGroup { group } => {
				let members = serde_json::to_string(&group.member_emails)
					.map_err(|e| EffectError::NonRetryable(e.to_string()))?;
				sqlx::query(
					r#"
					INSERT INTO user_groups (cc_pair_id, group_id, member_emails, updated_at) VALUES (?, ?, ?, ?)
					ON CONFLICT (cc_pair_id, group_id) DO UPDATE SET
						member_emails = excluded.member_emails,
						updated_at = excluded.updated_at
					"#,
				)
				.bind(resource_id.0)
				.bind(&group.id)
				.bind(members)
				.bind(&now)
				.execute(&self.pool)
				.await
				.map_err(effect_error)?;
			}
			SubtaskEffect::SyncDocumentSetMembership { document_id } => {
				sqlx::query(
					"UPDATE document_set_members SET synced_at = ? WHERE document_set_id = ? AND document_id = ?",
				)
				.bind(&now)
				.bind(resource_id.0)
				.bind(document_id)
				.execute(&self.pool)
				.await
				.map_err(effect_error)?;
			}
		}
		Ok(())
	}

	async fn remove_contribution_and_mark_dirty(
		&self,
		kind: JobKind,
		resource_id: ResourceId,
		effect: &SubtaskEffect,
	) -> std::result::Result<(), EffectError> {
		let mut tx = self.pool.begin().await.map_err(effect_error)?;
		match effect {
			SubtaskEffect::RemoveDocument { document_id } => {
				sqlx::query("DELETE FROM documents WHERE id = ? AND cc_pair_id = ?")
					.bind(document_id)
					.bind(resource_id.0)
					.execute(&mut *tx)
					.await
					.map_err(effect_error)?;
			}
			SubtaskEffect::UpsertExternalGroup { group } => {
				sqlx::query("DELETE FROM user_groups WHERE cc_pair_id = ? AND group_id = ?")
					.bind(resource_id.0)
					.bind(&group.id)
					.execute(&mut *tx)
					.await
					.map_err(effect_error)?;
			}
			SubtaskEffect::SyncDocumentSetMembership { document_id } => {
				sqlx::query(
					"UPDATE document_set_members SET synced_at = NULL WHERE document_set_id = ? AND document_id = ?",
				)
				.bind(resource_id.0)
				.bind(document_id)
				.execute(&mut *tx)
				.await
				.map_err(effect_error)?;
			}
		}
		sqlx::query(
			r#"
			INSERT INTO dirty_documents (kind, resource_id, item_id, marked_at) VALUES (?, ?, ?, ?)
			ON CONFLICT (kind, resource_id, item_id) DO UPDATE SET marked_at = excluded.marked_at
			"#,
		)
		.bind(kind.tag())
		.bind(resource_id.0)
		.bind(effect.item_id())
		.bind(Utc::now().to_rfc3339())
		.execute(&mut *tx)
		.await
		.map_err(effect_error)?;
		tx.commit().await.map_err(effect_error)?;
		Ok(())
	}
}
