//! Feed Store
//! Mission: Keep the time-ranked and price-ranked feed indexes in step
//!
//! Two sorted sets hold the same serialized [`PriceRecord`] members:
//! - `market:feed:time`, scored by insertion timestamp (ms)
//! - `market:feed:price`, scored by price
//!
//! There is no per-record key, so the member text is the identity.
//! Removal by code or by age on the price index has to scan and decode
//! every member. Writes to the two indexes share one pipeline with no
//! rollback; readers must tolerate the indexes drifting apart.
//!
//! The store holds no mutable state of its own and is safe to share
//! across request tasks and the cleanup scheduler.

pub mod code;
mod record;

pub use record::{FeedPage, PriceRecord, RemovalCounts, SortKey};

use crate::store::{Command, KvStore, PipelineMode, ScoreBound, StoreError, StoreResult};
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const TIME_INDEX_KEY: &str = "market:feed:time";
pub const PRICE_INDEX_KEY: &str = "market:feed:price";

/// ZSCAN COUNT hint for code/age sweeps
const SCAN_BATCH: usize = 200;

const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// How the write path bounds index growth
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WritePolicy {
    /// Writes never prune; the nightly job is the only cleanup
    ScheduledOnly,
    /// Every write also drops time-index entries older than `retention`.
    /// When `price_cap` is set, the price index keeps only the newest
    /// `price_cap` insertions still inside the retention window.
    InlinePrune {
        retention: Duration,
        price_cap: Option<usize>,
    },
}

impl Default for WritePolicy {
    fn default() -> Self {
        WritePolicy::InlinePrune {
            retention: Duration::from_secs(24 * 3600),
            price_cap: Some(5000),
        }
    }
}

/// Feed Store failures
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid price record: {0}")]
    InvalidInput(&'static str),

    #[error("failed to encode price record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("store call exceeded {0:?}")]
    Timeout(Duration),

    /// A sweep failed part-way; `removed` is what had already been deleted
    #[error("removal interrupted after {} time / {} price members: {source}", .removed.time, .removed.price)]
    Interrupted {
        removed: RemovalCounts,
        #[source]
        source: Box<FeedError>,
    },
}

impl FeedError {
    pub fn interrupted(removed: RemovalCounts, source: FeedError) -> Self {
        FeedError::Interrupted {
            removed,
            source: Box::new(source),
        }
    }

    /// Removal counts achieved before the failure (zero for non-sweep errors)
    pub fn removed(&self) -> RemovalCounts {
        match self {
            FeedError::Interrupted { removed, .. } => *removed,
            _ => RemovalCounts::default(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            FeedError::Timeout(_) => true,
            FeedError::Interrupted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Live removal counters for a bulk operation
///
/// Updated after every store round trip, so a caller that abandons the
/// operation (for example on an outer timeout) can still read what was
/// already deleted.
#[derive(Debug, Default)]
pub struct RemovalProgress {
    time: AtomicI64,
    price: AtomicI64,
}

impl RemovalProgress {
    pub fn snapshot(&self) -> RemovalCounts {
        RemovalCounts::new(
            self.time.load(Ordering::SeqCst),
            self.price.load(Ordering::SeqCst),
        )
    }
}

/// Source of insertion timestamps
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Settable clock for tests and replay tooling
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self(AtomicI64::new(now_millis))
    }

    pub fn set(&self, now_millis: i64) {
        self.0.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// The dual-index price feed
#[derive(Clone)]
pub struct FeedStore {
    store: Arc<dyn KvStore>,
    policy: WritePolicy,
    clock: Arc<dyn Clock>,
    op_timeout: Duration,
}

impl FeedStore {
    pub fn new(store: Arc<dyn KvStore>, policy: WritePolicy) -> Self {
        Self {
            store,
            policy,
            clock: Arc::new(SystemClock),
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Upper bound for each individual store round trip
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Run one store call under the operation timeout. Dropping the
    /// future on expiry abandons the in-flight request.
    async fn call<T>(&self, fut: impl Future<Output = StoreResult<T>>) -> Result<T, FeedError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(FeedError::from),
            Err(_) => Err(FeedError::Timeout(self.op_timeout)),
        }
    }

    /// Stamp, serialize and insert a record into both indexes
    ///
    /// `code` must already be normalized and validated. Both index writes
    /// (plus any inline pruning) go out in one non-transactional pipeline.
    pub async fn add_record(
        &self,
        code: &str,
        price: f64,
        server: Option<&str>,
    ) -> Result<PriceRecord, FeedError> {
        if code.is_empty() {
            return Err(FeedError::InvalidInput("empty code"));
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(FeedError::InvalidInput("price must be positive"));
        }

        let now = self.clock.now_millis();
        let record = PriceRecord {
            code: code.to_string(),
            price,
            server: server
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            timestamp: now,
        };
        let member = record.encode()?;

        let mut commands = vec![
            Command::ZAdd {
                key: TIME_INDEX_KEY.to_string(),
                member: member.clone(),
                score: now as f64,
            },
            Command::ZAdd {
                key: PRICE_INDEX_KEY.to_string(),
                member,
                score: price,
            },
        ];

        let mut price_cap = None;
        if let WritePolicy::InlinePrune {
            retention,
            price_cap: cap,
        } = self.policy
        {
            let cutoff = ScoreBound::Exclusive((now - retention.as_millis() as i64) as f64);
            price_cap = cap.filter(|c| *c > 0);
            if price_cap.is_some() {
                // Members about to leave the time window also leave the price index
                commands.push(Command::ZRangeByScore {
                    key: TIME_INDEX_KEY.to_string(),
                    min: ScoreBound::NegInf,
                    max: cutoff,
                });
            }
            commands.push(Command::ZRemRangeByScore {
                key: TIME_INDEX_KEY.to_string(),
                min: ScoreBound::NegInf,
                max: cutoff,
            });
            if let Some(cap) = price_cap {
                // Everything past the newest `cap` insertions
                commands.push(Command::ZRevRange {
                    key: TIME_INDEX_KEY.to_string(),
                    start: i64::try_from(cap).unwrap_or(i64::MAX),
                    stop: -1,
                });
            }
        }

        let replies = self
            .call(self.store.pipeline(commands, PipelineMode::Batched))
            .await?;

        let mut pruned = 0i64;
        if price_cap.is_some() {
            let mut replies = replies.into_iter().skip(2);
            let mut evict = replies
                .next()
                .map(|r| r.into_list("ZRANGEBYSCORE"))
                .transpose()?
                .unwrap_or_default();
            pruned += replies
                .next()
                .map(|r| r.into_int("ZREMRANGEBYSCORE"))
                .transpose()?
                .unwrap_or(0);
            evict.extend(
                replies
                    .next()
                    .map(|r| r.into_list("ZREVRANGE"))
                    .transpose()?
                    .unwrap_or_default(),
            );
            pruned += self.evict_from_price_index(evict).await;
        } else if let Some(reply) = replies.into_iter().nth(2) {
            pruned += reply.into_int("ZREMRANGEBYSCORE")?;
        }

        debug!(
            code = %record.code,
            price = record.price,
            ts = record.timestamp,
            pruned,
            "price record stored"
        );

        Ok(record)
    }

    /// Drop members from the price index after the record itself is stored.
    /// A failure here leaves extra members behind for the nightly job.
    async fn evict_from_price_index(&self, members: Vec<String>) -> i64 {
        if members.is_empty() {
            return 0;
        }
        let count = members.len();
        match self.call(self.store.zrem(PRICE_INDEX_KEY, members)).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(count, "price index cap eviction failed: {}", e);
                0
            }
        }
    }

    /// Up to `limit` records from one index, highest score first
    pub async fn query_top(&self, sort: SortKey, limit: usize) -> Result<FeedPage, FeedError> {
        if limit == 0 {
            return Ok(FeedPage::empty());
        }
        let key = match sort {
            SortKey::Time => TIME_INDEX_KEY,
            SortKey::Price => PRICE_INDEX_KEY,
        };
        let members = self
            .call(self.store.zrevrange(key, 0, i64::try_from(limit).unwrap_or(i64::MAX) - 1))
            .await?;
        Ok(FeedPage::new(members))
    }

    /// Remove every record whose code matches case-insensitively, from both indexes
    ///
    /// Full scan of each index. On failure the error carries the counts
    /// already removed (see [`FeedError::removed`]).
    pub async fn delete_by_code(&self, code: &str) -> Result<RemovalCounts, FeedError> {
        let target = code.trim().to_lowercase();
        let matches = |record: &PriceRecord| record.code.to_lowercase() == target;
        let progress = RemovalProgress::default();

        let swept = async {
            self.sweep(TIME_INDEX_KEY, &matches, &progress.time).await?;
            self.sweep(PRICE_INDEX_KEY, &matches, &progress.price).await
        };
        if let Err(e) = swept.await {
            return Err(FeedError::interrupted(progress.snapshot(), e));
        }

        let counts = progress.snapshot();
        info!(code = %code, removed_time = counts.time, removed_price = counts.price, "deleted feed records by code");
        Ok(counts)
    }

    /// Drop records with a timestamp strictly before `cutoff_millis`
    ///
    /// The time index supports a direct score-range removal; the price
    /// index is scored by price, so it is scanned and filtered by the
    /// decoded timestamp.
    pub async fn expire_older_than(&self, cutoff_millis: i64) -> Result<RemovalCounts, FeedError> {
        self.expire_older_than_with(cutoff_millis, &RemovalProgress::default())
            .await
    }

    /// [`Self::expire_older_than`], reporting counts into `progress` as it goes
    pub async fn expire_older_than_with(
        &self,
        cutoff_millis: i64,
        progress: &RemovalProgress,
    ) -> Result<RemovalCounts, FeedError> {
        let time = self
            .call(self.store.zrem_range_by_score(
                TIME_INDEX_KEY,
                ScoreBound::NegInf,
                ScoreBound::Exclusive(cutoff_millis as f64),
            ))
            .await?;
        progress.time.fetch_add(time, Ordering::SeqCst);

        let expired = |record: &PriceRecord| record.timestamp > 0 && record.timestamp < cutoff_millis;
        if let Err(e) = self.sweep(PRICE_INDEX_KEY, &expired, &progress.price).await {
            return Err(FeedError::interrupted(progress.snapshot(), e));
        }

        let counts = progress.snapshot();
        info!(cutoff_millis, removed_time = counts.time, removed_price = counts.price, "expired feed records");
        Ok(counts)
    }

    /// Empty both indexes, returning their cardinalities just before deletion
    pub async fn clear_all(&self) -> Result<RemovalCounts, FeedError> {
        self.clear_all_with(&RemovalProgress::default()).await
    }

    /// [`Self::clear_all`], reporting counts into `progress` once the transaction lands
    pub async fn clear_all_with(&self, progress: &RemovalProgress) -> Result<RemovalCounts, FeedError> {
        let replies = self
            .call(self.store.pipeline(
                vec![
                    Command::ZCard {
                        key: TIME_INDEX_KEY.to_string(),
                    },
                    Command::ZCard {
                        key: PRICE_INDEX_KEY.to_string(),
                    },
                    Command::Del {
                        keys: vec![TIME_INDEX_KEY.to_string(), PRICE_INDEX_KEY.to_string()],
                    },
                ],
                PipelineMode::Atomic,
            ))
            .await?;

        let mut replies = replies.into_iter();
        let time = replies
            .next()
            .map(|r| r.into_int("ZCARD"))
            .transpose()?
            .unwrap_or(0);
        let price = replies
            .next()
            .map(|r| r.into_int("ZCARD"))
            .transpose()?
            .unwrap_or(0);

        progress.time.fetch_add(time, Ordering::SeqCst);
        progress.price.fetch_add(price, Ordering::SeqCst);
        info!(removed_time = time, removed_price = price, "cleared feed indexes");
        Ok(RemovalCounts::new(time, price))
    }

    /// Scan `key` in batches and remove members whose decoded record matches
    ///
    /// Members that fail to decode are left alone. Every successful removal
    /// is added to `removed` before the next round trip.
    async fn sweep<F>(&self, key: &'static str, matches: &F, removed: &AtomicI64) -> Result<i64, FeedError>
    where
        F: Fn(&PriceRecord) -> bool + Sync,
    {
        let mut total = 0i64;
        let mut cursor = 0u64;
        loop {
            let (next, entries) = self.call(self.store.zscan(key, cursor, SCAN_BATCH)).await?;

            let doomed: Vec<String> = entries
                .into_iter()
                .filter_map(|(member, _score)| {
                    let record = PriceRecord::decode(&member).ok()?;
                    matches(&record).then_some(member)
                })
                .collect();

            if !doomed.is_empty() {
                let n = self.call(self.store.zrem(key, doomed)).await?;
                removed.fetch_add(n, Ordering::SeqCst);
                total += n;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        if total > 0 {
            debug!(key, removed = total, "sweep removed members");
        }
        Ok(total)
    }

    /// Cardinality of both indexes (diagnostics only; may be momentarily inconsistent)
    pub async fn index_sizes(&self) -> Result<(i64, i64), FeedError> {
        let time = self.call(self.store.zcard(TIME_INDEX_KEY)).await?;
        let price = self.call(self.store.zcard(PRICE_INDEX_KEY)).await?;
        if time != price {
            warn!(time, price, "feed indexes differ in size");
        }
        Ok((time, price))
    }
}
