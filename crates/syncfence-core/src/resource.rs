// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resource types: the entities that own sync jobs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::kind::ResourceType;

/// Identifier of a resource (cc_pair id, document set id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub i64);

impl fmt::Display for ResourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ResourceId {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.parse::<i64>()
			.map(ResourceId)
			.map_err(|_| CoreError::InvalidResourceId(s.to_string()))
	}
}

impl From<i64> for ResourceId {
	fn from(id: i64) -> Self {
		Self(id)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
	Active,
	Paused,
	Deleting,
}

impl ResourceStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ResourceStatus::Active => "active",
			ResourceStatus::Paused => "paused",
			ResourceStatus::Deleting => "deleting",
		}
	}
}

impl fmt::Display for ResourceStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ResourceStatus {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"active" => Ok(ResourceStatus::Active),
			"paused" => Ok(ResourceStatus::Paused),
			"deleting" => Ok(ResourceStatus::Deleting),
			_ => Err(CoreError::UnknownStatus(s.to_string())),
		}
	}
}

/// A resource as seen by one job kind.
///
/// `last_synced_at` is kind-specific: a cc_pair loaded for pruning carries its
/// last prune time, the same cc_pair loaded for group sync carries its last
/// group sync time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
	pub id: ResourceId,
	pub resource_type: ResourceType,
	pub status: ResourceStatus,
	pub created_at: DateTime<Utc>,
	pub last_synced_at: Option<DateTime<Utc>>,
	/// Sync period in seconds; `None` disables periodic sync.
	pub sync_period_secs: Option<u64>,
	/// Set when the resource has pending changes (document sets).
	pub needs_sync: bool,
}

impl Resource {
	pub fn new(id: ResourceId, resource_type: ResourceType, created_at: DateTime<Utc>) -> Self {
		Self {
			id,
			resource_type,
			status: ResourceStatus::Active,
			created_at,
			last_synced_at: None,
			sync_period_secs: None,
			needs_sync: false,
		}
	}

	pub fn sync_period(&self) -> Option<Duration> {
		self.sync_period_secs
			.map(|secs| Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000)))
	}

	/// When the next periodic sync is due, falling back to the creation time
	/// for resources that never synced.
	pub fn next_sync_due(&self) -> Option<DateTime<Utc>> {
		let period = self.sync_period()?;
		let base = self.last_synced_at.unwrap_or(self.created_at);
		base.checked_add_signed(period)
	}

	pub fn is_deleting(&self) -> bool {
		self.status == ResourceStatus::Deleting
	}
}

/// A group definition enumerated from an external source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalGroup {
	pub id: String,
	pub member_emails: Vec<String>,
}
