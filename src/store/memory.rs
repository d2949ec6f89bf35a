//! In-process store backend
//!
//! Mirrors the Redis semantics the services rely on: sorted sets ordered by
//! (score, member), negative rank indices, string TTLs, capped lists, and a
//! ZSCAN cursor that stays valid while members are removed mid-scan.
//! A single mutex makes every command (and every pipeline) atomic.

use super::{Command, KvStore, PipelineMode, Reply, ScoreBound, StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

#[derive(Default)]
struct SortedSet {
    /// member -> (score, insertion sequence)
    members: HashMap<String, (f64, u64)>,
    next_seq: u64,
}

impl SortedSet {
    fn add(&mut self, member: String, score: f64) -> i64 {
        match self.members.get_mut(&member) {
            Some(entry) => {
                entry.0 = score;
                0
            }
            None => {
                self.next_seq += 1;
                self.members.insert(member, (score, self.next_seq));
                1
            }
        }
    }

    /// Ascending (score, member) order, as Redis ranks them
    fn ordered(&self) -> Vec<(&String, f64)> {
        let mut out: Vec<(&String, f64)> = self.members.iter().map(|(m, (s, _))| (m, *s)).collect();
        out.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        out
    }
}

#[derive(Default)]
struct MemoryState {
    strings: HashMap<String, (String, Option<Instant>)>,
    sets: HashMap<String, BTreeSet<String>>,
    zsets: HashMap<String, SortedSet>,
    lists: HashMap<String, VecDeque<String>>,
}

impl MemoryState {
    fn purge_expired(&mut self, key: &str) {
        let expired = matches!(
            self.strings.get(key),
            Some((_, Some(deadline))) if *deadline <= Instant::now()
        );
        if expired {
            self.strings.remove(key);
        }
    }

    fn contains(&mut self, key: &str) -> bool {
        self.purge_expired(key);
        self.strings.contains_key(key)
            || self.sets.contains_key(key)
            || self.zsets.contains_key(key)
            || self.lists.contains_key(key)
    }

    fn remove(&mut self, key: &str) -> bool {
        let existed = self.contains(key);
        self.strings.remove(key);
        self.sets.remove(key);
        self.zsets.remove(key);
        self.lists.remove(key);
        existed
    }

    fn apply(&mut self, command: Command) -> Reply {
        match command {
            Command::Get { key } => {
                self.purge_expired(&key);
                match self.strings.get(&key) {
                    Some((v, _)) => Reply::Value(v.clone()),
                    None => Reply::Nil,
                }
            }
            Command::Set { key, value, ttl } => {
                let deadline = ttl.map(|t| Instant::now() + t);
                self.sets.remove(&key);
                self.zsets.remove(&key);
                self.lists.remove(&key);
                self.strings.insert(key, (value, deadline));
                Reply::Ok
            }
            Command::Del { keys } => {
                let removed = keys.iter().filter(|k| self.remove(k)).count();
                Reply::Int(removed as i64)
            }
            Command::Exists { key } => Reply::Int(i64::from(self.contains(&key))),
            Command::SAdd { key, member } => {
                let inserted = self.sets.entry(key).or_default().insert(member);
                Reply::Int(i64::from(inserted))
            }
            Command::SRem { key, member } => {
                let removed = match self.sets.get_mut(&key) {
                    Some(set) => set.remove(&member),
                    None => false,
                };
                if self.sets.get(&key).is_some_and(|s| s.is_empty()) {
                    self.sets.remove(&key);
                }
                Reply::Int(i64::from(removed))
            }
            Command::SMembers { key } => Reply::List(
                self.sets
                    .get(&key)
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default(),
            ),
            Command::Scan {
                cursor,
                pattern,
                count,
            } => {
                let now = Instant::now();
                let mut keys: Vec<String> = self
                    .strings
                    .iter()
                    .filter(|(_, (_, deadline))| deadline.map_or(true, |d| d > now))
                    .map(|(k, _)| k.clone())
                    .chain(self.sets.keys().cloned())
                    .chain(self.zsets.keys().cloned())
                    .chain(self.lists.keys().cloned())
                    .filter(|k| glob_match(&pattern, k))
                    .collect();
                keys.sort();
                let (page, next) = paginate(&keys, cursor, count);
                Reply::KeyPage {
                    cursor: next,
                    keys: page,
                }
            }
            Command::ZAdd { key, member, score } => {
                Reply::Int(self.zsets.entry(key).or_default().add(member, score))
            }
            Command::ZRem { key, members } => {
                let Some(zset) = self.zsets.get_mut(&key) else {
                    return Reply::Int(0);
                };
                let removed = members
                    .iter()
                    .filter(|m| zset.members.remove(*m).is_some())
                    .count();
                self.drop_if_empty(&key);
                Reply::Int(removed as i64)
            }
            Command::ZRangeByScore { key, min, max } => {
                let Some(zset) = self.zsets.get(&key) else {
                    return Reply::List(Vec::new());
                };
                Reply::List(
                    zset.ordered()
                        .into_iter()
                        .filter(|(_, score)| in_score_range(*score, &min, &max))
                        .map(|(m, _)| m.clone())
                        .collect(),
                )
            }
            Command::ZRemRangeByScore { key, min, max } => {
                let Some(zset) = self.zsets.get_mut(&key) else {
                    return Reply::Int(0);
                };
                let before = zset.members.len();
                zset.members
                    .retain(|_, (score, _)| !in_score_range(*score, &min, &max));
                let removed = before - zset.members.len();
                self.drop_if_empty(&key);
                Reply::Int(removed as i64)
            }
            Command::ZRemRangeByRank { key, start, stop } => {
                let Some(zset) = self.zsets.get_mut(&key) else {
                    return Reply::Int(0);
                };
                let ordered = zset.ordered();
                let Some((lo, hi)) = resolve_range(ordered.len(), start, stop) else {
                    return Reply::Int(0);
                };
                let doomed: Vec<String> = ordered[lo..=hi].iter().map(|(m, _)| (*m).clone()).collect();
                for m in &doomed {
                    zset.members.remove(m);
                }
                self.drop_if_empty(&key);
                Reply::Int(doomed.len() as i64)
            }
            Command::ZRevRange { key, start, stop } => {
                let Some(zset) = self.zsets.get(&key) else {
                    return Reply::List(Vec::new());
                };
                let mut ordered = zset.ordered();
                ordered.reverse();
                match resolve_range(ordered.len(), start, stop) {
                    Some((lo, hi)) => {
                        Reply::List(ordered[lo..=hi].iter().map(|(m, _)| (*m).clone()).collect())
                    }
                    None => Reply::List(Vec::new()),
                }
            }
            Command::ZCard { key } => Reply::Int(
                self.zsets
                    .get(&key)
                    .map(|z| z.members.len() as i64)
                    .unwrap_or(0),
            ),
            Command::ZScan { key, cursor, count } => {
                let Some(zset) = self.zsets.get(&key) else {
                    return Reply::ScoredPage {
                        cursor: 0,
                        entries: Vec::new(),
                    };
                };
                // Cursor is an insertion sequence number: removals never shift unseen members.
                let mut pending: Vec<(u64, &String, f64)> = zset
                    .members
                    .iter()
                    .filter(|(_, (_, seq))| *seq >= cursor)
                    .map(|(m, (score, seq))| (*seq, m, *score))
                    .collect();
                pending.sort_by_key(|(seq, _, _)| *seq);
                let take = count.max(1);
                let next = if pending.len() > take {
                    pending[take].0
                } else {
                    0
                };
                let entries = pending
                    .into_iter()
                    .take(take)
                    .map(|(_, m, s)| (m.clone(), s))
                    .collect();
                Reply::ScoredPage {
                    cursor: next,
                    entries,
                }
            }
            Command::LPush { key, value } => {
                let list = self.lists.entry(key).or_default();
                list.push_front(value);
                Reply::Int(list.len() as i64)
            }
            Command::LTrim { key, start, stop } => {
                if let Some(list) = self.lists.get_mut(&key) {
                    match resolve_range(list.len(), start, stop) {
                        Some((lo, hi)) => {
                            let kept: VecDeque<String> = list.drain(..).skip(lo).take(hi - lo + 1).collect();
                            *list = kept;
                        }
                        None => list.clear(),
                    }
                    if list.is_empty() {
                        self.lists.remove(&key);
                    }
                }
                Reply::Ok
            }
            Command::LRange { key, start, stop } => {
                let Some(list) = self.lists.get(&key) else {
                    return Reply::List(Vec::new());
                };
                match resolve_range(list.len(), start, stop) {
                    Some((lo, hi)) => Reply::List(list.range(lo..=hi).cloned().collect()),
                    None => Reply::List(Vec::new()),
                }
            }
        }
    }

    fn drop_if_empty(&mut self, key: &str) {
        if self.zsets.get(key).is_some_and(|z| z.members.is_empty()) {
            self.zsets.remove(key);
        }
    }
}

fn in_score_range(score: f64, min: &ScoreBound, max: &ScoreBound) -> bool {
    min.admits_from_below(score) && max.admits_from_above(score)
}

/// Redis-style inclusive index range with negative offsets, clamped to `len`
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn paginate(items: &[String], cursor: u64, count: usize) -> (Vec<String>, u64) {
    let start = cursor as usize;
    if start >= items.len() {
        return (Vec::new(), 0);
    }
    let end = (start + count.max(1)).min(items.len());
    let next = if end >= items.len() { 0 } else { end as u64 };
    (items[start..end].to_vec(), next)
}

/// Glob matching for SCAN patterns (`*` and `?` only)
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// In-memory [`KvStore`] with optional per-key fault injection
#[derive(Default)]
pub struct MemoryKvStore {
    state: Mutex<MemoryState>,
    failing_keys: Mutex<HashSet<String>>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command touching `key` fail until [`heal_key`](Self::heal_key)
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().insert(key.to_string());
    }

    pub fn heal_key(&self, key: &str) {
        self.failing_keys.lock().remove(key);
    }

    /// Delay every call, to exercise caller timeouts
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    fn check_faults(&self, commands: &[Command]) -> StoreResult<()> {
        let failing = self.failing_keys.lock();
        if failing.is_empty() {
            return Ok(());
        }
        for command in commands {
            if let Some(key) = command.keys().into_iter().find(|k| failing.contains(*k)) {
                return Err(StoreError::Unavailable(format!(
                    "injected fault on {} {}",
                    command.name(),
                    key
                )));
            }
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn execute(&self, command: Command) -> StoreResult<Reply> {
        self.simulate_latency().await;
        self.check_faults(std::slice::from_ref(&command))?;
        Ok(self.state.lock().apply(command))
    }

    async fn pipeline(
        &self,
        commands: Vec<Command>,
        _mode: PipelineMode,
    ) -> StoreResult<Vec<Reply>> {
        self.simulate_latency().await;
        self.check_faults(&commands)?;
        let mut state = self.state.lock();
        Ok(commands.into_iter().map(|c| state.apply(c)).collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
