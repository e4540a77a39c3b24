// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for core parsing.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while parsing wire identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
	#[error("unknown job kind: {0}")]
	UnknownKind(String),

	#[error("unknown resource status: {0}")]
	UnknownStatus(String),

	#[error("invalid resource id: {0}")]
	InvalidResourceId(String),

	#[error("invalid task id: {0}")]
	InvalidTaskId(String),
}
