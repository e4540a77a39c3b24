// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job kinds and the resource types they run against.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// The type of entity a job kind operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
	/// A connector-credential pairing (`cc_pair`).
	ConnectorCredentialPair,
	DocumentSet,
}

impl ResourceType {
	pub fn as_str(&self) -> &'static str {
		match self {
			ResourceType::ConnectorCredentialPair => "cc_pair",
			ResourceType::DocumentSet => "document_set",
		}
	}
}

impl fmt::Display for ResourceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ResourceType {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"cc_pair" => Ok(ResourceType::ConnectorCredentialPair),
			"document_set" => Ok(ResourceType::DocumentSet),
			_ => Err(CoreError::UnknownKind(s.to_string())),
		}
	}
}

/// A kind of fan-out sync job.
///
/// The tag is the first segment of every KV key and task id for the kind, so
/// it must never contain `_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
	/// Remove documents that no longer exist at the source.
	Pruning,
	/// Remove every document a connector contributed, then the connector.
	ConnectorDeletion,
	/// Mirror external group memberships for permission sync.
	ExternalGroupSync,
	/// Push document-set membership to the index.
	DocumentSetSync,
}

impl JobKind {
	pub const ALL: [JobKind; 4] = [
		JobKind::Pruning,
		JobKind::ConnectorDeletion,
		JobKind::ExternalGroupSync,
		JobKind::DocumentSetSync,
	];

	pub fn tag(&self) -> &'static str {
		match self {
			JobKind::Pruning => "connectorpruning",
			JobKind::ConnectorDeletion => "connectordeletion",
			JobKind::ExternalGroupSync => "externalgroupsync",
			JobKind::DocumentSetSync => "documentset",
		}
	}

	pub fn from_tag(tag: &str) -> Option<JobKind> {
		JobKind::ALL.into_iter().find(|k| k.tag() == tag)
	}

	pub fn resource_type(&self) -> ResourceType {
		match self {
			JobKind::Pruning | JobKind::ConnectorDeletion | JobKind::ExternalGroupSync => {
				ResourceType::ConnectorCredentialPair
			}
			JobKind::DocumentSetSync => ResourceType::DocumentSet,
		}
	}
}

impl fmt::Display for JobKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.tag())
	}
}

impl FromStr for JobKind {
	type Err = CoreError;

	/// Accepts either the wire tag (`connectorpruning`) or the snake_case name
	/// (`pruning`).
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if let Some(kind) = JobKind::from_tag(s) {
			return Ok(kind);
		}
		match s {
			"pruning" => Ok(JobKind::Pruning),
			"connector_deletion" => Ok(JobKind::ConnectorDeletion),
			"external_group_sync" => Ok(JobKind::ExternalGroupSync),
			"document_set_sync" => Ok(JobKind::DocumentSetSync),
			_ => Err(CoreError::UnknownKind(s.to_string())),
		}
	}
}
