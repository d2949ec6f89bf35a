//! Redis store backend
//!
//! Thin translation layer: each [`Command`] becomes one `redis::Cmd`, each
//! reply is decoded according to the command that produced it.

use super::{Command, KvStore, PipelineMode, Reply, StoreError, StoreResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Redis-backed [`KvStore`]
pub struct RedisKvStore {
    conn: ::redis::aio::ConnectionManager,
}

impl RedisKvStore {
    /// Connect and verify the server answers PING within `connect_timeout`
    pub async fn connect(url: &str, connect_timeout: Duration) -> StoreResult<Self> {
        let client = ::redis::Client::open(url)?;
        let conn = tokio::time::timeout(connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Unavailable(format!("connect timed out after {:?}", connect_timeout)))??;

        let store = Self { conn };
        let mut conn = store.conn.clone();
        let pong: String = tokio::time::timeout(connect_timeout, ::redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| StoreError::Unavailable("PING timed out".to_string()))??;
        info!(reply = %pong, "Redis connection established");

        Ok(store)
    }
}

fn to_cmd(command: &Command) -> ::redis::Cmd {
    let mut cmd = ::redis::cmd(command.name());
    match command {
        Command::Get { key }
        | Command::Exists { key }
        | Command::SMembers { key }
        | Command::ZCard { key } => {
            cmd.arg(key);
        }
        Command::Set { key, value, ttl } => {
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl.as_millis() as u64);
            }
        }
        Command::Del { keys } => {
            cmd.arg(keys);
        }
        Command::SAdd { key, member } | Command::SRem { key, member } => {
            cmd.arg(key).arg(member);
        }
        Command::Scan {
            cursor,
            pattern,
            count,
        } => {
            cmd.arg(*cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(*count);
        }
        Command::ZAdd { key, member, score } => {
            cmd.arg(key).arg(*score).arg(member);
        }
        Command::ZRem { key, members } => {
            cmd.arg(key).arg(members);
        }
        Command::ZRangeByScore { key, min, max }
        | Command::ZRemRangeByScore { key, min, max } => {
            cmd.arg(key).arg(min.to_arg()).arg(max.to_arg());
        }
        Command::ZRemRangeByRank { key, start, stop }
        | Command::ZRevRange { key, start, stop }
        | Command::LTrim { key, start, stop }
        | Command::LRange { key, start, stop } => {
            cmd.arg(key).arg(*start).arg(*stop);
        }
        Command::ZScan { key, cursor, count } => {
            cmd.arg(key).arg(*cursor).arg("COUNT").arg(*count);
        }
        Command::LPush { key, value } => {
            cmd.arg(key).arg(value);
        }
    }
    cmd
}

fn decode(command: &Command, value: ::redis::Value) -> StoreResult<Reply> {
    use ::redis::from_redis_value;

    let reply = match command {
        Command::Get { .. } => match from_redis_value::<Option<String>>(&value)? {
            Some(v) => Reply::Value(v),
            None => Reply::Nil,
        },
        Command::Set { .. } | Command::LTrim { .. } => {
            // Server errors surface as Err from query_async; anything else is a success
            Reply::Ok
        }
        Command::Del { .. }
        | Command::Exists { .. }
        | Command::SAdd { .. }
        | Command::SRem { .. }
        | Command::ZAdd { .. }
        | Command::ZRem { .. }
        | Command::ZRemRangeByScore { .. }
        | Command::ZRemRangeByRank { .. }
        | Command::ZCard { .. }
        | Command::LPush { .. } => Reply::Int(from_redis_value::<i64>(&value)?),
        Command::SMembers { .. }
        | Command::ZRangeByScore { .. }
        | Command::ZRevRange { .. }
        | Command::LRange { .. } => {
            Reply::List(from_redis_value::<Vec<String>>(&value)?)
        }
        Command::Scan { .. } => {
            let (cursor, keys) = from_redis_value::<(u64, Vec<String>)>(&value)?;
            Reply::KeyPage { cursor, keys }
        }
        Command::ZScan { .. } => {
            let (cursor, flat) = from_redis_value::<(u64, Vec<String>)>(&value)?;
            Reply::ScoredPage {
                cursor,
                entries: pair_scores(flat)?,
            }
        }
    };
    Ok(reply)
}

/// ZSCAN returns `[member, score, member, score, ...]`
fn pair_scores(flat: Vec<String>) -> StoreResult<Vec<(String, f64)>> {
    if flat.len() % 2 != 0 {
        return Err(StoreError::UnexpectedReply {
            command: "ZSCAN",
            reply: format!("odd element count {}", flat.len()),
        });
    }
    let mut out = Vec::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(member), Some(score)) = (iter.next(), iter.next()) {
        let score = score.parse::<f64>().map_err(|_| StoreError::UnexpectedReply {
            command: "ZSCAN",
            reply: format!("non-numeric score {score:?}"),
        })?;
        out.push((member, score));
    }
    Ok(out)
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn execute(&self, command: Command) -> StoreResult<Reply> {
        let mut conn = self.conn.clone();
        let value: ::redis::Value = to_cmd(&command).query_async(&mut conn).await?;
        decode(&command, value)
    }

    async fn pipeline(
        &self,
        commands: Vec<Command>,
        mode: PipelineMode,
    ) -> StoreResult<Vec<Reply>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = ::redis::pipe();
        if mode == PipelineMode::Atomic {
            pipe.atomic();
        }
        for command in &commands {
            pipe.add_command(to_cmd(command));
        }

        let mut conn = self.conn.clone();
        let values: Vec<::redis::Value> = pipe.query_async(&mut conn).await?;
        if values.len() != commands.len() {
            return Err(StoreError::UnexpectedReply {
                command: "PIPELINE",
                reply: format!("{} replies for {} commands", values.len(), commands.len()),
            });
        }
        debug!(commands = commands.len(), ?mode, "pipeline executed");

        commands
            .iter()
            .zip(values)
            .map(|(command, value)| decode(command, value))
            .collect()
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScoreBound;

    fn args(cmd: &::redis::Cmd) -> Vec<String> {
        cmd.args_iter()
            .map(|arg| match arg {
                ::redis::Arg::Simple(bytes) => String::from_utf8_lossy(bytes).to_string(),
                ::redis::Arg::Cursor => "<cursor>".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_zadd_puts_score_before_member() {
        let cmd = to_cmd(&Command::ZAdd {
            key: "market:feed:time".into(),
            member: "{}".into(),
            score: 1_700_000_000_000.0,
        });
        let a = args(&cmd);
        assert_eq!(a[0], "ZADD");
        assert_eq!(a[1], "market:feed:time");
        assert_eq!(a[3], "{}");
    }

    #[test]
    fn test_range_removal_uses_bound_syntax() {
        let cmd = to_cmd(&Command::ZRemRangeByScore {
            key: "k".into(),
            min: ScoreBound::NegInf,
            max: ScoreBound::Exclusive(1000.0),
        });
        assert_eq!(args(&cmd), vec!["ZREMRANGEBYSCORE", "k", "-inf", "(1000"]);

        let cmd = to_cmd(&Command::ZRangeByScore {
            key: "k".into(),
            min: ScoreBound::NegInf,
            max: ScoreBound::Exclusive(1000.0),
        });
        assert_eq!(args(&cmd), vec!["ZRANGEBYSCORE", "k", "-inf", "(1000"]);
    }

    #[test]
    fn test_set_with_ttl_uses_px() {
        let cmd = to_cmd(&Command::Set {
            key: "auth:captcha:1".into(),
            value: "ABCD".into(),
            ttl: Some(Duration::from_secs(300)),
        });
        assert_eq!(
            args(&cmd),
            vec!["SET", "auth:captcha:1", "ABCD", "PX", "300000"]
        );
    }

    #[test]
    fn test_pair_scores() {
        let pairs = pair_scores(vec!["a".into(), "1.5".into(), "b".into(), "2".into()]).unwrap();
        assert_eq!(pairs, vec![("a".to_string(), 1.5), ("b".to_string(), 2.0)]);
        assert!(pair_scores(vec!["a".into()]).is_err());
        assert!(pair_scores(vec!["a".into(), "nan?".into()]).is_err());
    }

    #[test]
    fn test_decode_scan_page() {
        let value = ::redis::Value::Array(vec![
            ::redis::Value::BulkString(b"17".to_vec()),
            ::redis::Value::Array(vec![
                ::redis::Value::BulkString(b"m".to_vec()),
                ::redis::Value::BulkString(b"3".to_vec()),
            ]),
        ]);
        let reply = decode(
            &Command::ZScan {
                key: "k".into(),
                cursor: 0,
                count: 200,
            },
            value,
        )
        .unwrap();
        assert_eq!(
            reply,
            Reply::ScoredPage {
                cursor: 17,
                entries: vec![("m".to_string(), 3.0)]
            }
        );
    }
}
