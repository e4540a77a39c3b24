// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Build information for syncfence-worker.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Set by the release pipeline; `unknown` for local builds.
pub const GIT_SHA: &str = match option_env!("SYNCFENCE_GIT_SHA") {
	Some(sha) => sha,
	None => "unknown",
};

pub const BUILD_TIMESTAMP: Option<&str> = option_env!("SYNCFENCE_BUILD_TIMESTAMP");

/// Format version info for display.
pub fn format_version_info() -> String {
	use chrono::{DateTime, Utc};

	let mut output = format!(
		"syncfence-worker version: {}\n\
         Git SHA:                  {}\n\
         Built at:                 {}\n\
         Platform:                 {}-{}",
		VERSION,
		GIT_SHA,
		BUILD_TIMESTAMP.unwrap_or("unknown"),
		std::env::consts::OS,
		std::env::consts::ARCH,
	);

	if let Some(built_at) = BUILD_TIMESTAMP.and_then(|ts| DateTime::parse_from_rfc3339(ts).ok()) {
		let built_at_utc: DateTime<Utc> = built_at.into();
		if let Ok(age) = Utc::now().signed_duration_since(built_at_utc).to_std() {
			output.push_str(&format!(
				"\nBuild age:                {} ({} seconds)",
				humantime::format_duration(age),
				age.as_secs()
			));
		}
	}

	output
}
