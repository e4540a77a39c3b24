// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite-backed KV store shared by every worker process pointed at the same
//! database file.
//!
//! String keys live in `kv_entries` with an optional expiry in epoch
//! milliseconds; set keys live in `kv_set_members`. Expired rows are ignored by
//! every read and overwritten by `set_nx`; [`SqliteKvStore::purge_expired`]
//! reclaims the space.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

use crate::error::{KvError, Result};
use crate::store::KvStore;

/// Create a SqlitePool with WAL mode, a busy timeout and `create_if_missing`.
#[instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| KvError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(Duration::from_secs(5))
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("kv database pool created");
	Ok(pool)
}

#[derive(Clone)]
pub struct SqliteKvStore {
	pool: SqlitePool,
}

fn now_ms() -> i64 {
	Utc::now().timestamp_millis()
}

fn expiry_ms(ttl: Option<Duration>) -> Option<i64> {
	ttl.map(|ttl| now_ms() + i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX / 2))
}

/// Escape LIKE wildcards so a prefix matches literally.
fn like_prefix(prefix: &str) -> String {
	let mut out = String::with_capacity(prefix.len() + 1);
	for c in prefix.chars() {
		if matches!(c, '\\' | '%' | '_') {
			out.push('\\');
		}
		out.push(c);
	}
	out.push('%');
	out
}

impl SqliteKvStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	/// Create the backing tables if they do not exist.
	#[instrument(skip(self))]
	pub async fn ensure_schema(&self) -> Result<()> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS kv_entries (
				key TEXT PRIMARY KEY,
				value TEXT NOT NULL,
				expires_at INTEGER
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS kv_set_members (
				key TEXT NOT NULL,
				member TEXT NOT NULL,
				PRIMARY KEY (key, member)
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	/// Delete expired string keys. Returns the number of rows removed.
	#[instrument(skip(self))]
	pub async fn purge_expired(&self) -> Result<u64> {
		let result =
			sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
				.bind(now_ms())
				.execute(&self.pool)
				.await?;
		Ok(result.rows_affected())
	}

	async fn is_set_key(&self, key: &str) -> Result<bool> {
		let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM kv_set_members WHERE key = ? LIMIT 1")
			.bind(key)
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.is_some())
	}

	async fn is_string_key(&self, key: &str) -> Result<bool> {
		let row: Option<(i64,)> = sqlx::query_as(
			"SELECT 1 FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
		)
		.bind(key)
		.bind(now_ms())
		.fetch_optional(&self.pool)
		.await?;
		Ok(row.is_some())
	}
}

#[async_trait]
impl KvStore for SqliteKvStore {
	#[instrument(skip(self))]
	async fn ping(&self) -> Result<()> {
		sqlx::query("SELECT 1").execute(&self.pool).await?;
		Ok(())
	}

	#[instrument(skip(self))]
	async fn get(&self, key: &str) -> Result<Option<String>> {
		let row: Option<(String,)> = sqlx::query_as(
			"SELECT value FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
		)
		.bind(key)
		.bind(now_ms())
		.fetch_optional(&self.pool)
		.await?;
		match row {
			Some((value,)) => Ok(Some(value)),
			None if self.is_set_key(key).await? => Err(KvError::WrongType {
				key: key.to_string(),
			}),
			None => Ok(None),
		}
	}

	#[instrument(skip(self, value))]
	async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
		if self.is_set_key(key).await? {
			return Err(KvError::WrongType {
				key: key.to_string(),
			});
		}
		sqlx::query(
			r#"
			INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
			ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
			"#,
		)
		.bind(key)
		.bind(value)
		.bind(expiry_ms(ttl))
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	#[instrument(skip(self, value))]
	async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
		if self.is_set_key(key).await? {
			return Err(KvError::WrongType {
				key: key.to_string(),
			});
		}
		let result = sqlx::query(
			r#"
			INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
			ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at
			WHERE kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= ?
			"#,
		)
		.bind(key)
		.bind(value)
		.bind(expiry_ms(ttl))
		.bind(now_ms())
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected() == 1)
	}

	#[instrument(skip(self))]
	async fn delete(&self, key: &str) -> Result<bool> {
		let now = now_ms();
		let live_string = sqlx::query(
			"DELETE FROM kv_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
		)
		.bind(key)
		.bind(now)
		.execute(&self.pool)
		.await?
		.rows_affected();
		sqlx::query("DELETE FROM kv_entries WHERE key = ?")
			.bind(key)
			.execute(&self.pool)
			.await?;
		let members = sqlx::query("DELETE FROM kv_set_members WHERE key = ?")
			.bind(key)
			.execute(&self.pool)
			.await?
			.rows_affected();
		Ok(live_string + members > 0)
	}

	#[instrument(skip(self))]
	async fn exists(&self, key: &str) -> Result<bool> {
		Ok(self.is_string_key(key).await? || self.is_set_key(key).await?)
	}

	#[instrument(skip(self, expected))]
	async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
		let result = sqlx::query(
			r#"
			DELETE FROM kv_entries
			WHERE key = ? AND value = ? AND (expires_at IS NULL OR expires_at > ?)
			"#,
		)
		.bind(key)
		.bind(expected)
		.bind(now_ms())
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected() == 1)
	}

	#[instrument(skip(self, expected))]
	async fn expire_if_eq(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE kv_entries SET expires_at = ?
			WHERE key = ? AND value = ? AND (expires_at IS NULL OR expires_at > ?)
			"#,
		)
		.bind(expiry_ms(Some(ttl)))
		.bind(key)
		.bind(expected)
		.bind(now_ms())
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected() == 1)
	}

	#[instrument(skip(self))]
	async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
		let now = now_ms();
		let current = self.get(key).await?;
		if let Some(value) = &current {
			if value.parse::<i64>().is_err() {
				return Err(KvError::InvalidValue {
					key: key.to_string(),
					message: format!("not an integer: {value}"),
				});
			}
		}

		// Expired rows restart from zero; live rows keep their expiry.
		let (value,): (String,) = sqlx::query_as(
			r#"
			INSERT INTO kv_entries (key, value, expires_at) VALUES (?, CAST(? AS TEXT), NULL)
			ON CONFLICT(key) DO UPDATE SET
				value = CAST(
					CASE
						WHEN kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= ? THEN ?
						ELSE CAST(kv_entries.value AS INTEGER) + ?
					END AS TEXT),
				expires_at = CASE
					WHEN kv_entries.expires_at IS NOT NULL AND kv_entries.expires_at <= ? THEN NULL
					ELSE kv_entries.expires_at
				END
			RETURNING value
			"#,
		)
		.bind(key)
		.bind(delta)
		.bind(now)
		.bind(delta)
		.bind(delta)
		.bind(now)
		.fetch_one(&self.pool)
		.await?;

		value.parse::<i64>().map_err(|e| KvError::InvalidValue {
			key: key.to_string(),
			message: e.to_string(),
		})
	}

	#[instrument(skip(self))]
	async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
		if self.is_string_key(key).await? {
			return Err(KvError::WrongType {
				key: key.to_string(),
			});
		}
		let result = sqlx::query("INSERT OR IGNORE INTO kv_set_members (key, member) VALUES (?, ?)")
			.bind(key)
			.bind(member)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() == 1)
	}

	#[instrument(skip(self))]
	async fn srem(&self, key: &str, member: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM kv_set_members WHERE key = ? AND member = ?")
			.bind(key)
			.bind(member)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() == 1)
	}

	#[instrument(skip(self))]
	async fn scard(&self, key: &str) -> Result<u64> {
		let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv_set_members WHERE key = ?")
			.bind(key)
			.fetch_one(&self.pool)
			.await?;
		Ok(count.max(0) as u64)
	}

	#[instrument(skip(self))]
	async fn smembers(&self, key: &str) -> Result<Vec<String>> {
		let rows: Vec<(String,)> =
			sqlx::query_as("SELECT member FROM kv_set_members WHERE key = ? ORDER BY member")
				.bind(key)
				.fetch_all(&self.pool)
				.await?;
		Ok(rows.into_iter().map(|(m,)| m).collect())
	}

	#[instrument(skip(self))]
	async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
		let pattern = like_prefix(prefix);
		let rows: Vec<(String,)> = sqlx::query_as(
			r#"
			SELECT key FROM kv_entries
			WHERE key LIKE ? ESCAPE '\' AND (expires_at IS NULL OR expires_at > ?)
			UNION
			SELECT DISTINCT key FROM kv_set_members WHERE key LIKE ? ESCAPE '\'
			ORDER BY key
			"#,
		)
		.bind(&pattern)
		.bind(now_ms())
		.bind(&pattern)
		.fetch_all(&self.pool)
		.await?;
		Ok(rows.into_iter().map(|(k,)| k).collect())
	}

	async fn close(&self) {
		self.pool.close().await;
	}
}
