// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Result type for KV operations.
pub type Result<T> = std::result::Result<T, KvError>;

#[derive(Debug, Error)]
pub enum KvError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("key {key} holds the wrong kind of value")]
	WrongType { key: String },

	#[error("invalid value for key {key}: {message}")]
	InvalidValue { key: String, message: String },

	#[error("store unavailable after {attempts} attempts: {message}")]
	Unavailable { attempts: u32, message: String },

	#[error("internal error: {0}")]
	Internal(String),
}
