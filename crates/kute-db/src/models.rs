//! Database row types and column codecs — these map directly to SQLite rows.
//! Distinct from kute-types API models to keep the DB layer independent.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use kute_types::api::{Gender, MatchStatus};

/// Credential row used by the auth path. Everything else about a user is
/// assembled into a `UserProfile` by the query layer.
pub struct CredentialRow {
    pub id: String,
    pub name: String,
    pub password: String,
}

pub struct MatchRow {
    pub id: String,
    pub user_lo: String,
    pub user_hi: String,
    pub initiator_id: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub match_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub created_at: String,
}

// -- Column codecs --

pub fn gender_to_str(g: Gender) -> &'static str {
    match g {
        Gender::Male => "male",
        Gender::Female => "female",
        Gender::Other => "other",
    }
}

pub fn gender_from_str(s: &str) -> Result<Gender> {
    match s {
        "male" => Ok(Gender::Male),
        "female" => Ok(Gender::Female),
        "other" => Ok(Gender::Other),
        other => Err(anyhow!("unknown gender column value: {}", other)),
    }
}

pub fn status_to_str(s: MatchStatus) -> &'static str {
    match s {
        MatchStatus::Pending => "pending",
        MatchStatus::Matched => "matched",
        MatchStatus::Rejected => "rejected",
    }
}

pub fn status_from_str(s: &str) -> Result<MatchStatus> {
    match s {
        "pending" => Ok(MatchStatus::Pending),
        "matched" => Ok(MatchStatus::Matched),
        "rejected" => Ok(MatchStatus::Rejected),
        other => Err(anyhow!("unknown match status column value: {}", other)),
    }
}

/// Timestamps are written as RFC 3339; tolerate SQLite's bare
/// "YYYY-MM-DD HH:MM:SS" for rows created by hand.
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc())
        .map_err(|e| anyhow!("bad timestamp '{}': {}", s, e))
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

/// The sorted pair key for a match. String comparison over hyphenated UUIDs
/// is stable, which is all the unique index needs.
pub fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
