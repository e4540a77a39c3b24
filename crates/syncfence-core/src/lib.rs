// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the syncfence job coordination system.
//!
//! This crate defines the vocabulary shared by the KV primitives, the task
//! queue and the job runtime:
//! - [`JobKind`]: the closed set of fan-out job kinds and their wire tags
//! - [`Resource`]: the entity a sync job runs against
//! - [`TaskId`]: the `{kind}_{resource_id}_{uuid}` task identifier
//! - [`FencePayload`]: the value stored under a fence key

pub mod error;
pub mod fence;
pub mod kind;
pub mod resource;
pub mod task_id;

pub use error::{CoreError, Result};
pub use fence::FencePayload;
pub use kind::{JobKind, ResourceType};
pub use resource::{ExternalGroup, Resource, ResourceId, ResourceStatus};
pub use task_id::TaskId;
