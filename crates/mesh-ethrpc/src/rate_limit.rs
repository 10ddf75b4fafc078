//! Two-limit request budget in front of an RPC client.
//!
//! A token bucket bounds requests per second; a daily counter bounds requests
//! per UTC day. The daily counter lives in the store's metadata document so
//! a restart does not refill the budget.

use crate::{CallRequest, EthRpcClient, EthRpcError, LogFilter};
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{
	clock::{Clock as _, DefaultClock},
	state::{InMemoryState, NotKeyed},
	Quota, RateLimiter,
};
use mesh_storage::{OrderStore, StorageError};
use mesh_types::{Clock, EthLog, MiniHeader};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Requests counted between metadata writes.
const PERSIST_EVERY: u64 = 100;

#[derive(Debug, Clone, Copy)]
struct DailyBudget {
	day_start: DateTime<Utc>,
	used: u64,
	unpersisted: u64,
}

/// Start of the UTC day containing `t`.
pub fn utc_midnight(t: DateTime<Utc>) -> DateTime<Utc> {
	t.date_naive()
		.and_hms_opt(0, 0, 0)
		.map(|naive| naive.and_utc())
		.unwrap_or(t)
}

/// Wraps a client so every request draws from the per-second and per-day
/// budgets. Waiting for the per-second bucket is bounded by `max_wait`.
pub struct RateLimitedClient<C> {
	inner: C,
	per_second: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
	max_per_day: u64,
	max_wait: Duration,
	budget: Mutex<DailyBudget>,
	store: Arc<dyn OrderStore>,
	clock: Arc<dyn Clock>,
}

impl<C: EthRpcClient> RateLimitedClient<C> {
	/// Builds the limiter, resuming the daily counter from `store`.
	pub async fn new(
		inner: C,
		max_per_second: u32,
		max_per_day: u64,
		max_wait: Duration,
		store: Arc<dyn OrderStore>,
		clock: Arc<dyn Clock>,
	) -> Result<Self, EthRpcError> {
		let per_second = NonZeroU32::new(max_per_second).ok_or_else(|| {
			EthRpcError::Configuration("max_requests_per_second must be non-zero".to_string())
		})?;
		let metadata = store.get_metadata().await.map_err(storage_error)?;

		let today = utc_midnight(clock.now());
		let budget = if metadata.eth_rpc_request_day_start >= today {
			DailyBudget {
				day_start: metadata.eth_rpc_request_day_start,
				used: metadata.eth_rpc_requests_used,
				unpersisted: 0,
			}
		} else {
			DailyBudget {
				day_start: today,
				used: 0,
				unpersisted: 0,
			}
		};
		debug!(used = budget.used, max_per_day, "Resumed RPC request budget");

		Ok(Self {
			inner,
			per_second: RateLimiter::direct(Quota::per_second(per_second)),
			max_per_day,
			max_wait,
			budget: Mutex::new(budget),
			store,
			clock,
		})
	}

	/// Requests spent in the current UTC day.
	pub fn requests_used(&self) -> u64 {
		self.budget.lock().unwrap_or_else(|e| e.into_inner()).used
	}

	/// Writes the daily counter to the store.
	pub async fn flush(&self) -> Result<(), EthRpcError> {
		let snapshot = {
			let mut budget = self.budget.lock().unwrap_or_else(|e| e.into_inner());
			budget.unpersisted = 0;
			*budget
		};
		self.store
			.update_metadata(Box::new(move |m| {
				m.eth_rpc_request_day_start = snapshot.day_start;
				m.eth_rpc_requests_used = snapshot.used;
			}))
			.await
			.map_err(storage_error)?;
		Ok(())
	}

	/// Rolls the counter over at UTC midnight and reports whether today's
	/// budget is spent.
	fn daily_exhausted(&self) -> bool {
		let today = utc_midnight(self.clock.now());
		let mut budget = self.budget.lock().unwrap_or_else(|e| e.into_inner());
		if budget.day_start < today {
			budget.day_start = today;
			budget.used = 0;
			budget.unpersisted = PERSIST_EVERY;
		}
		budget.used >= self.max_per_day
	}

	/// Consumes one unit of daily budget, returning whether it should be persisted now.
	fn take_daily(&self) -> Result<bool, EthRpcError> {
		if self.daily_exhausted() {
			return Err(EthRpcError::RequestBudgetExhausted);
		}
		let mut budget = self.budget.lock().unwrap_or_else(|e| e.into_inner());
		budget.used += 1;
		budget.unpersisted += 1;
		Ok(budget.unpersisted >= PERSIST_EVERY)
	}

	/// Waits for the per-second bucket, bounded by `max_wait`.
	async fn wait_per_second(&self) -> Result<(), EthRpcError> {
		let deadline = tokio::time::Instant::now() + self.max_wait;
		loop {
			match self.per_second.check() {
				Ok(_) => return Ok(()),
				Err(not_until) => {
					let wait = not_until.wait_time_from(DefaultClock::default().now());
					if tokio::time::Instant::now() + wait > deadline {
						return Err(EthRpcError::Timeout);
					}
					tokio::time::sleep(wait).await;
				}
			}
		}
	}

	/// Admits one request. The daily unit is charged only once the
	/// per-second bucket has let the request through.
	async fn acquire(&self) -> Result<(), EthRpcError> {
		if self.daily_exhausted() {
			warn!(max_per_day = self.max_per_day, "RPC request budget exhausted");
			return Err(EthRpcError::RequestBudgetExhausted);
		}
		self.wait_per_second().await?;

		let persist = match self.take_daily() {
			Ok(persist) => persist,
			Err(e) => {
				warn!(max_per_day = self.max_per_day, "RPC request budget exhausted");
				return Err(e);
			}
		};
		if persist {
			if let Err(e) = self.flush().await {
				warn!(error = %e, "Failed to persist RPC request budget");
			}
		}
		Ok(())
	}
}

fn storage_error(e: StorageError) -> EthRpcError {
	EthRpcError::Transport(format!("request budget store: {}", e))
}

#[async_trait]
impl<C: EthRpcClient> EthRpcClient for RateLimitedClient<C> {
	async fn header_by_hash(&self, hash: B256) -> Result<MiniHeader, EthRpcError> {
		self.acquire().await?;
		self.inner.header_by_hash(hash).await
	}

	async fn header_by_number(&self, number: Option<u64>) -> Result<MiniHeader, EthRpcError> {
		self.acquire().await?;
		self.inner.header_by_number(number).await
	}

	async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<EthLog>, EthRpcError> {
		self.acquire().await?;
		self.inner.filter_logs(filter).await
	}

	async fn call_contract(
		&self,
		call: CallRequest,
		block_number: Option<u64>,
	) -> Result<Bytes, EthRpcError> {
		self.acquire().await?;
		self.inner.call_contract(call, block_number).await
	}

	async fn code_at(
		&self,
		address: Address,
		block_number: Option<u64>,
	) -> Result<Bytes, EthRpcError> {
		self.acquire().await?;
		self.inner.code_at(address, block_number).await
	}

	async fn call_context(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, EthRpcError> {
		self.acquire().await?;
		self.inner.call_context(method, params).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;
	use mesh_storage::implementations::memory::MemoryStorage;
	use mesh_types::ManualClock;
	use std::sync::atomic::{AtomicU64, Ordering};

	#[derive(Default)]
	struct CountingClient {
		calls: AtomicU64,
	}

	#[async_trait]
	impl EthRpcClient for CountingClient {
		async fn header_by_hash(&self, hash: B256) -> Result<MiniHeader, EthRpcError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(MiniHeader {
				number: 1,
				hash,
				parent: B256::ZERO,
				timestamp: 0,
				logs: Vec::new(),
			})
		}

		async fn header_by_number(&self, _: Option<u64>) -> Result<MiniHeader, EthRpcError> {
			self.header_by_hash(B256::ZERO).await
		}

		async fn filter_logs(&self, _: &LogFilter) -> Result<Vec<EthLog>, EthRpcError> {
			Ok(Vec::new())
		}

		async fn call_contract(&self, _: CallRequest, _: Option<u64>) -> Result<Bytes, EthRpcError> {
			Ok(Bytes::new())
		}

		async fn code_at(&self, _: Address, _: Option<u64>) -> Result<Bytes, EthRpcError> {
			Ok(Bytes::new())
		}

		async fn call_context(
			&self,
			_: &str,
			_: serde_json::Value,
		) -> Result<serde_json::Value, EthRpcError> {
			Ok(serde_json::Value::Null)
		}
	}

	fn noon(day: u32) -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
	}

	async fn limited(
		max_per_day: u64,
		store: Arc<dyn OrderStore>,
		clock: Arc<ManualClock>,
	) -> RateLimitedClient<CountingClient> {
		RateLimitedClient::new(
			CountingClient::default(),
			1000,
			max_per_day,
			Duration::from_secs(5),
			store,
			clock,
		)
		.await
		.unwrap()
	}

	#[tokio::test]
	async fn test_daily_budget_exhaustion_and_reset() {
		let store: Arc<dyn OrderStore> = Arc::new(MemoryStorage::new(20));
		let clock = Arc::new(ManualClock::new(noon(1)));
		let client = limited(3, store, clock.clone()).await;

		for _ in 0..3 {
			client.header_by_number(None).await.unwrap();
		}
		assert_eq!(
			client.header_by_number(None).await,
			Err(EthRpcError::RequestBudgetExhausted)
		);
		assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);

		clock.set(noon(2));
		assert!(client.header_by_number(None).await.is_ok());
		assert_eq!(client.requests_used(), 1);
	}

	#[tokio::test]
	async fn test_budget_resumes_from_store() {
		let store: Arc<dyn OrderStore> = Arc::new(MemoryStorage::new(20));
		let clock = Arc::new(ManualClock::new(noon(1)));

		let first = limited(10, store.clone(), clock.clone()).await;
		for _ in 0..4 {
			first.header_by_number(None).await.unwrap();
		}
		first.flush().await.unwrap();

		let metadata = store.get_metadata().await.unwrap();
		assert_eq!(metadata.eth_rpc_requests_used, 4);
		assert_eq!(metadata.eth_rpc_request_day_start, utc_midnight(noon(1)));

		let second = limited(10, store.clone(), clock.clone()).await;
		assert_eq!(second.requests_used(), 4);

		clock.set(noon(3));
		let third = limited(10, store, clock).await;
		assert_eq!(third.requests_used(), 0);
	}

	#[tokio::test]
	async fn test_per_second_timeout_keeps_daily_budget() {
		let store: Arc<dyn OrderStore> = Arc::new(MemoryStorage::new(20));
		let clock = Arc::new(ManualClock::new(noon(1)));
		let client = RateLimitedClient::new(
			CountingClient::default(),
			1,
			10,
			Duration::ZERO,
			store,
			clock,
		)
		.await
		.unwrap();

		client.header_by_number(None).await.unwrap();
		assert_eq!(client.header_by_number(None).await, Err(EthRpcError::Timeout));
		assert_eq!(client.header_by_number(None).await, Err(EthRpcError::Timeout));
		assert_eq!(client.requests_used(), 1);
		assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_utc_midnight() {
		assert_eq!(
			utc_midnight(noon(7)),
			Utc.with_ymd_and_hms(2024, 5, 7, 0, 0, 0).unwrap()
		);
	}
}
