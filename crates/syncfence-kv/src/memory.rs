// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process KV store.
//!
//! Expiry uses the tokio clock, so tests running with paused time can advance
//! past TTLs deterministically.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{KvError, Result};
use crate::store::KvStore;

enum Value {
	Str(String),
	Set(HashSet<String>),
}

struct Slot {
	value: Value,
	expires_at: Option<Instant>,
}

impl Slot {
	fn is_live(&self, now: Instant) -> bool {
		self.expires_at.map(|at| at > now).unwrap_or(true)
	}
}

#[derive(Default)]
pub struct MemoryKvStore {
	slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryKvStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
		self.slots.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Drop `key` if it has expired, then return the live slot if any.
fn live<'a>(slots: &'a mut HashMap<String, Slot>, key: &str, now: Instant) -> Option<&'a mut Slot> {
	if slots.get(key).is_some_and(|s| !s.is_live(now)) {
		slots.remove(key);
	}
	slots.get_mut(key)
}

fn wrong_type(key: &str) -> KvError {
	KvError::WrongType {
		key: key.to_string(),
	}
}

#[async_trait]
impl KvStore for MemoryKvStore {
	async fn ping(&self) -> Result<()> {
		Ok(())
	}

	async fn get(&self, key: &str) -> Result<Option<String>> {
		let mut slots = self.slots();
		match live(&mut slots, key, Instant::now()) {
			Some(Slot {
				value: Value::Str(v),
				..
			}) => Ok(Some(v.clone())),
			Some(_) => Err(wrong_type(key)),
			None => Ok(None),
		}
	}

	async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
		let now = Instant::now();
		let mut slots = self.slots();
		if let Some(Slot {
			value: Value::Set(_),
			..
		}) = live(&mut slots, key, now)
		{
			return Err(wrong_type(key));
		}
		slots.insert(
			key.to_string(),
			Slot {
				value: Value::Str(value.to_string()),
				expires_at: ttl.map(|ttl| now + ttl),
			},
		);
		Ok(())
	}

	async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
		let now = Instant::now();
		let mut slots = self.slots();
		match live(&mut slots, key, now) {
			Some(Slot {
				value: Value::Set(_),
				..
			}) => return Err(wrong_type(key)),
			Some(_) => return Ok(false),
			None => {}
		}
		slots.insert(
			key.to_string(),
			Slot {
				value: Value::Str(value.to_string()),
				expires_at: ttl.map(|ttl| now + ttl),
			},
		);
		Ok(true)
	}

	async fn delete(&self, key: &str) -> Result<bool> {
		let now = Instant::now();
		Ok(self
			.slots()
			.remove(key)
			.is_some_and(|slot| slot.is_live(now)))
	}

	async fn exists(&self, key: &str) -> Result<bool> {
		let mut slots = self.slots();
		Ok(live(&mut slots, key, Instant::now()).is_some())
	}

	async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
		let mut slots = self.slots();
		let matches = matches!(
			live(&mut slots, key, Instant::now()),
			Some(Slot { value: Value::Str(v), .. }) if v == expected
		);
		if matches {
			slots.remove(key);
		}
		Ok(matches)
	}

	async fn expire_if_eq(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
		let now = Instant::now();
		let mut slots = self.slots();
		match live(&mut slots, key, now) {
			Some(slot) if matches!(&slot.value, Value::Str(v) if v == expected) => {
				slot.expires_at = Some(now + ttl);
				Ok(true)
			}
			_ => Ok(false),
		}
	}

	async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
		let now = Instant::now();
		let mut slots = self.slots();
		let current = match live(&mut slots, key, now) {
			Some(Slot {
				value: Value::Str(v),
				..
			}) => v.parse::<i64>().map_err(|_| KvError::InvalidValue {
				key: key.to_string(),
				message: format!("not an integer: {v}"),
			})?,
			Some(_) => return Err(wrong_type(key)),
			None => 0,
		};
		let next = current.saturating_add(delta);
		let expires_at = slots.get(key).and_then(|s| s.expires_at);
		slots.insert(
			key.to_string(),
			Slot {
				value: Value::Str(next.to_string()),
				expires_at,
			},
		);
		Ok(next)
	}

	async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
		let mut slots = self.slots();
		match live(&mut slots, key, Instant::now()) {
			Some(Slot {
				value: Value::Set(members),
				..
			}) => Ok(members.insert(member.to_string())),
			Some(_) => Err(wrong_type(key)),
			None => {
				slots.insert(
					key.to_string(),
					Slot {
						value: Value::Set(HashSet::from([member.to_string()])),
						expires_at: None,
					},
				);
				Ok(true)
			}
		}
	}

	async fn srem(&self, key: &str, member: &str) -> Result<bool> {
		let mut slots = self.slots();
		let (removed, now_empty) = match live(&mut slots, key, Instant::now()) {
			Some(Slot {
				value: Value::Set(members),
				..
			}) => (members.remove(member), members.is_empty()),
			Some(_) => return Err(wrong_type(key)),
			None => return Ok(false),
		};
		if now_empty {
			slots.remove(key);
		}
		Ok(removed)
	}

	async fn scard(&self, key: &str) -> Result<u64> {
		let mut slots = self.slots();
		match live(&mut slots, key, Instant::now()) {
			Some(Slot {
				value: Value::Set(members),
				..
			}) => Ok(members.len() as u64),
			Some(_) => Err(wrong_type(key)),
			None => Ok(0),
		}
	}

	async fn smembers(&self, key: &str) -> Result<Vec<String>> {
		let mut slots = self.slots();
		match live(&mut slots, key, Instant::now()) {
			Some(Slot {
				value: Value::Set(members),
				..
			}) => {
				let mut out: Vec<String> = members.iter().cloned().collect();
				out.sort();
				Ok(out)
			}
			Some(_) => Err(wrong_type(key)),
			None => Ok(Vec::new()),
		}
	}

	async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
		let now = Instant::now();
		let slots = self.slots();
		let mut keys: Vec<String> = slots
			.iter()
			.filter(|(k, s)| k.starts_with(prefix) && s.is_live(now))
			.map(|(k, _)| k.clone())
			.collect();
		keys.sort();
		Ok(keys)
	}
}
