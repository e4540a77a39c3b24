// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Task identifiers in the `{kind}_{resource_id}_{uuid}` wire format.
//!
//! Generator tasks and subtasks share the format. The completion hook recovers
//! the kind and resource from a finished task's id alone, so the format is a
//! compatibility contract with every worker that is still running.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;
use crate::kind::JobKind;
use crate::resource::ResourceId;

const SEPARATOR: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
	pub kind: JobKind,
	pub resource_id: ResourceId,
	pub uuid: Uuid,
}

impl TaskId {
	/// Mint a new globally unique id for `kind` on `resource_id`.
	pub fn new(kind: JobKind, resource_id: ResourceId) -> Self {
		Self {
			kind,
			resource_id,
			uuid: Uuid::new_v4(),
		}
	}

	pub fn parse(raw: &str) -> Result<Self, CoreError> {
		let invalid = || CoreError::InvalidTaskId(raw.to_string());

		let mut parts = raw.splitn(3, SEPARATOR);
		let tag = parts.next().ok_or_else(invalid)?;
		let resource = parts.next().ok_or_else(invalid)?;
		let uuid = parts.next().ok_or_else(invalid)?;

		let kind = JobKind::from_tag(tag).ok_or_else(invalid)?;
		let resource_id = resource.parse::<ResourceId>().map_err(|_| invalid())?;
		let uuid = Uuid::parse_str(uuid).map_err(|_| invalid())?;

		Ok(Self {
			kind,
			resource_id,
			uuid,
		})
	}
}

impl fmt::Display for TaskId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}{SEPARATOR}{}{SEPARATOR}{}",
			self.kind.tag(),
			self.resource_id,
			self.uuid
		)
	}
}

impl FromStr for TaskId {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl Serialize for TaskId {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for TaskId {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		TaskId::parse(&raw).map_err(serde::de::Error::custom)
	}
}
