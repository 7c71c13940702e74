//! Statement routing between the primary and its read replicas.
//!
//! [`route`] is a pure function of its [`RouteInput`]; the pool supplies the health
//! snapshot and cursor, and records the choice afterwards.

use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use serde::Deserialize;

use crate::types::Role;

/// Whether a statement may be served by a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
}

const READ_KEYWORDS: [&str; 6] = ["SELECT", "VALUES", "SHOW", "EXPLAIN", "WITH", "TABLE"];

static WRITE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(insert|update|delete|merge|into|truncate|share)\b")
        .expect("write clause pattern is valid")
});

impl Intent {
    /// Classify SQL by its first keyword.
    ///
    /// Reads are `SELECT`, `VALUES`, `SHOW`, `EXPLAIN`, `TABLE` and `WITH`, unless the
    /// statement also mentions a data-modifying or locking clause (`INSERT`, `UPDATE`,
    /// `DELETE`, `MERGE`, `INTO`, `TRUNCATE`, `FOR SHARE`). Everything else is a write.
    ///
    /// ```rust
    /// use sqlweave::pool::Intent;
    ///
    /// assert_eq!(Intent::detect("-- hi\n select 1"), Intent::Read);
    /// assert_eq!(Intent::detect("select * from t for update"), Intent::Write);
    /// assert_eq!(Intent::detect("with x as (delete from t returning *) select * from x"), Intent::Write);
    /// ```
    #[must_use]
    pub fn detect(sql: &str) -> Intent {
        let body = skip_leading_noise(sql);
        let keyword_len = body
            .bytes()
            .take_while(u8::is_ascii_alphabetic)
            .count();
        let keyword = &body[..keyword_len];
        let is_read_keyword = READ_KEYWORDS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(keyword));

        if is_read_keyword && !WRITE_CLAUSE.is_match(body) {
            Intent::Read
        } else {
            Intent::Write
        }
    }
}

/// Strip whitespace, `--` comments, `/* */` comments and opening parentheses.
fn skip_leading_noise(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.find('\n').map_or("", |pos| &after[pos + 1..]);
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |pos| &after[pos + 2..]);
        } else {
            return trimmed;
        }
    }
}

/// How reads are spread over healthy replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaPolicy {
    #[default]
    RoundRobin,
    LeastRecentlyUsed,
}

/// Where a statement runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Primary,
    Replica(usize),
}

impl Target {
    #[must_use]
    pub fn role(self) -> Role {
        match self {
            Target::Primary => Role::Primary,
            Target::Replica(_) => Role::Replica,
        }
    }
}

/// Point-in-time view of one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaView {
    pub healthy: bool,
    pub last_used: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    pub intent: Intent,
    pub in_transaction: bool,
    pub replicas: &'a [ReplicaView],
    /// Round-robin position; only its value modulo the replica count matters.
    pub cursor: usize,
    pub policy: ReplicaPolicy,
}

/// Pick the target for one statement.
///
/// Writes and anything inside a transaction go to the primary. Reads go to a healthy
/// replica chosen by `policy`, or to the primary when none is healthy.
#[must_use]
pub fn route(input: &RouteInput<'_>) -> Target {
    if input.intent == Intent::Write || input.in_transaction || input.replicas.is_empty() {
        return Target::Primary;
    }

    let count = input.replicas.len();
    let chosen = match input.policy {
        ReplicaPolicy::RoundRobin => (0..count)
            .map(|offset| (input.cursor + offset) % count)
            .find(|&idx| input.replicas[idx].healthy),
        // never-used replicas (None) sort first; ties keep the lowest index
        ReplicaPolicy::LeastRecentlyUsed => input
            .replicas
            .iter()
            .enumerate()
            .filter(|(_, view)| view.healthy)
            .min_by_key(|(_, view)| view.last_used)
            .map(|(idx, _)| idx),
    };

    chosen.map_or(Target::Primary, Target::Replica)
}
