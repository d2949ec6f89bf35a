//! Key-Value Store Adapter
//! Mission: One command vocabulary for every backend the feed, auth and admin layers talk to
//!
//! The services never hold a concrete client. They receive an
//! `Arc<dyn KvStore>` at construction and express every round trip as a
//! [`Command`] (or a pipeline of them). Two backends exist:
//! - [`redis::RedisKvStore`] for production
//! - [`memory::MemoryKvStore`] for tests and local runs without Redis

pub mod memory;
pub mod redis;

pub use self::memory::MemoryKvStore;
pub use self::redis::RedisKvStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures raised by a store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: &'static str, reply: String },
}

/// Score boundary for sorted-set range commands
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    Inclusive(f64),
    Exclusive(f64),
}

impl ScoreBound {
    /// Render in Redis range syntax (`-inf`, `+inf`, `5`, `(5`)
    pub fn to_arg(&self) -> String {
        match self {
            ScoreBound::NegInf => "-inf".to_string(),
            ScoreBound::PosInf => "+inf".to_string(),
            ScoreBound::Inclusive(v) => format_score(*v),
            ScoreBound::Exclusive(v) => format!("({}", format_score(*v)),
        }
    }

    /// Whether `score` lies on the allowed side of this bound when used as a minimum
    pub fn admits_from_below(&self, score: f64) -> bool {
        match self {
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
            ScoreBound::Inclusive(v) => score >= *v,
            ScoreBound::Exclusive(v) => score > *v,
        }
    }

    /// Whether `score` lies on the allowed side of this bound when used as a maximum
    pub fn admits_from_above(&self, score: f64) -> bool {
        match self {
            ScoreBound::NegInf => false,
            ScoreBound::PosInf => true,
            ScoreBound::Inclusive(v) => score <= *v,
            ScoreBound::Exclusive(v) => score < *v,
        }
    }
}

/// Integral scores (millisecond timestamps) must not be rendered in exponent form
fn format_score(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e17 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// How a batch of commands is shipped to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Sent together in one round trip, no isolation (best-effort)
    Batched,
    /// Wrapped in MULTI/EXEC
    Atomic,
}

/// Every store operation the services issue
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String, ttl: Option<Duration> },
    Del { keys: Vec<String> },
    Exists { key: String },
    SAdd { key: String, member: String },
    SRem { key: String, member: String },
    SMembers { key: String },
    /// Keyspace cursor scan (`SCAN cursor MATCH pattern COUNT n`)
    Scan { cursor: u64, pattern: String, count: usize },
    ZAdd { key: String, member: String, score: f64 },
    ZRem { key: String, members: Vec<String> },
    /// Members with scores in `[min, max]`, lowest score first
    ZRangeByScore { key: String, min: ScoreBound, max: ScoreBound },
    ZRemRangeByScore { key: String, min: ScoreBound, max: ScoreBound },
    ZRemRangeByRank { key: String, start: i64, stop: i64 },
    ZRevRange { key: String, start: i64, stop: i64 },
    ZCard { key: String },
    ZScan { key: String, cursor: u64, count: usize },
    LPush { key: String, value: String },
    LTrim { key: String, start: i64, stop: i64 },
    LRange { key: String, start: i64, stop: i64 },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::Del { .. } => "DEL",
            Command::Exists { .. } => "EXISTS",
            Command::SAdd { .. } => "SADD",
            Command::SRem { .. } => "SREM",
            Command::SMembers { .. } => "SMEMBERS",
            Command::Scan { .. } => "SCAN",
            Command::ZAdd { .. } => "ZADD",
            Command::ZRem { .. } => "ZREM",
            Command::ZRangeByScore { .. } => "ZRANGEBYSCORE",
            Command::ZRemRangeByScore { .. } => "ZREMRANGEBYSCORE",
            Command::ZRemRangeByRank { .. } => "ZREMRANGEBYRANK",
            Command::ZRevRange { .. } => "ZREVRANGE",
            Command::ZCard { .. } => "ZCARD",
            Command::ZScan { .. } => "ZSCAN",
            Command::LPush { .. } => "LPUSH",
            Command::LTrim { .. } => "LTRIM",
            Command::LRange { .. } => "LRANGE",
        }
    }

    /// Keys touched by this command (used by fault injection and logging)
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Command::Del { keys } => keys.iter().map(String::as_str).collect(),
            Command::Scan { .. } => Vec::new(),
            Command::Get { key }
            | Command::Set { key, .. }
            | Command::Exists { key }
            | Command::SAdd { key, .. }
            | Command::SRem { key, .. }
            | Command::SMembers { key }
            | Command::ZAdd { key, .. }
            | Command::ZRem { key, .. }
            | Command::ZRangeByScore { key, .. }
            | Command::ZRemRangeByScore { key, .. }
            | Command::ZRemRangeByRank { key, .. }
            | Command::ZRevRange { key, .. }
            | Command::ZCard { key }
            | Command::ZScan { key, .. }
            | Command::LPush { key, .. }
            | Command::LTrim { key, .. }
            | Command::LRange { key, .. } => vec![key.as_str()],
        }
    }
}

/// Decoded reply to a [`Command`]
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Value(String),
    List(Vec<String>),
    /// Next cursor plus keys (SCAN)
    KeyPage { cursor: u64, keys: Vec<String> },
    /// Next cursor plus (member, score) pairs (ZSCAN)
    ScoredPage { cursor: u64, entries: Vec<(String, f64)> },
}

impl Reply {
    fn unexpected(self, command: &'static str) -> StoreError {
        StoreError::UnexpectedReply {
            command,
            reply: format!("{:?}", self),
        }
    }

    pub fn into_int(self, command: &'static str) -> StoreResult<i64> {
        match self {
            Reply::Int(n) => Ok(n),
            Reply::Nil => Ok(0),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_opt_value(self, command: &'static str) -> StoreResult<Option<String>> {
        match self {
            Reply::Value(v) => Ok(Some(v)),
            Reply::Nil => Ok(None),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_list(self, command: &'static str) -> StoreResult<Vec<String>> {
        match self {
            Reply::List(items) => Ok(items),
            Reply::Nil => Ok(Vec::new()),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_ok(self, command: &'static str) -> StoreResult<()> {
        match self {
            Reply::Ok | Reply::Int(_) => Ok(()),
            other => Err(other.unexpected(command)),
        }
    }
}

/// A sorted-set-capable key-value store
///
/// Implementations must be safe for unsynchronized concurrent use: all
/// coordination is delegated to the backend's own atomicity.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Run a single command
    async fn execute(&self, command: Command) -> StoreResult<Reply>;

    /// Run several commands in one round trip; replies are returned in order
    async fn pipeline(&self, commands: Vec<Command>, mode: PipelineMode)
        -> StoreResult<Vec<Reply>>;

    /// Backend name for logs
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.execute(Command::Get { key: key.to_string() })
            .await?
            .into_opt_value("GET")
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        self.execute(Command::Set {
            key: key.to_string(),
            value,
            ttl,
        })
        .await?
        .into_ok("SET")
    }

    async fn del(&self, keys: &[&str]) -> StoreResult<i64> {
        self.execute(Command::Del {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        })
        .await?
        .into_int("DEL")
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let n = self
            .execute(Command::Exists { key: key.to_string() })
            .await?
            .into_int("EXISTS")?;
        Ok(n > 0)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<i64> {
        self.execute(Command::SAdd {
            key: key.to_string(),
            member: member.to_string(),
        })
        .await?
        .into_int("SADD")
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<i64> {
        self.execute(Command::SRem {
            key: key.to_string(),
            member: member.to_string(),
        })
        .await?
        .into_int("SREM")
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.execute(Command::SMembers { key: key.to_string() })
            .await?
            .into_list("SMEMBERS")
    }

    async fn scan_keys(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        match self
            .execute(Command::Scan {
                cursor,
                pattern: pattern.to_string(),
                count,
            })
            .await?
        {
            Reply::KeyPage { cursor, keys } => Ok((cursor, keys)),
            other => Err(other.unexpected("SCAN")),
        }
    }

    async fn zadd(&self, key: &str, member: String, score: f64) -> StoreResult<i64> {
        self.execute(Command::ZAdd {
            key: key.to_string(),
            member,
            score,
        })
        .await?
        .into_int("ZADD")
    }

    async fn zrem(&self, key: &str, members: Vec<String>) -> StoreResult<i64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.execute(Command::ZRem {
            key: key.to_string(),
            members,
        })
        .await?
        .into_int("ZREM")
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> StoreResult<Vec<String>> {
        self.execute(Command::ZRangeByScore {
            key: key.to_string(),
            min,
            max,
        })
        .await?
        .into_list("ZRANGEBYSCORE")
    }

    async fn zrem_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> StoreResult<i64> {
        self.execute(Command::ZRemRangeByScore {
            key: key.to_string(),
            min,
            max,
        })
        .await?
        .into_int("ZREMRANGEBYSCORE")
    }

    async fn zrem_range_by_rank(&self, key: &str, start: i64, stop: i64) -> StoreResult<i64> {
        self.execute(Command::ZRemRangeByRank {
            key: key.to_string(),
            start,
            stop,
        })
        .await?
        .into_int("ZREMRANGEBYRANK")
    }

    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.execute(Command::ZRevRange {
            key: key.to_string(),
            start,
            stop,
        })
        .await?
        .into_list("ZREVRANGE")
    }

    async fn zcard(&self, key: &str) -> StoreResult<i64> {
        self.execute(Command::ZCard { key: key.to_string() })
            .await?
            .into_int("ZCARD")
    }

    async fn zscan(
        &self,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<(u64, Vec<(String, f64)>)> {
        match self
            .execute(Command::ZScan {
                key: key.to_string(),
                cursor,
                count,
            })
            .await?
        {
            Reply::ScoredPage { cursor, entries } => Ok((cursor, entries)),
            other => Err(other.unexpected("ZSCAN")),
        }
    }

    async fn lpush(&self, key: &str, value: String) -> StoreResult<i64> {
        self.execute(Command::LPush {
            key: key.to_string(),
            value,
        })
        .await?
        .into_int("LPUSH")
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()> {
        self.execute(Command::LTrim {
            key: key.to_string(),
            start,
            stop,
        })
        .await?
        .into_ok("LTRIM")
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.execute(Command::LRange {
            key: key.to_string(),
            start,
            stop,
        })
        .await?
        .into_list("LRANGE")
    }
}
