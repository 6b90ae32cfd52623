use anyhow::Result;
use rusqlite::Connection;
use uuid::Uuid;

use kute_types::api::{LastMessage, MatchRecord, MatchStatus, MatchSummary};

use crate::models::{MatchRow, now_ts, pair_key, parse_ts, status_from_str};
use crate::users::{query_photos, query_profile};
use crate::{Database, OptionalExt};

/// Result of recording a like.
#[derive(Debug)]
pub enum LikeOutcome {
    /// The counterpart had already liked us — the pair is now matched.
    Matched(MatchRecord),
    /// One-way like recorded (or re-confirmed); the counterpart is not told.
    Pending(MatchRecord),
}

/// Result of recording a nope.
#[derive(Debug)]
pub enum NopeOutcome {
    Recorded(MatchRecord),
    /// Some record for the pair already existed; nothing was written.
    AlreadyRecorded,
}

impl Database {
    /// Record that `from` likes `to`.
    ///
    /// Runs as one transaction so two users liking each other concurrently
    /// serialize into a single record: the compare-and-swap UPDATE claims the
    /// counterpart's pending like if there is one, and the pair-unique index
    /// keeps a second pending row from ever existing.
    pub fn like(&self, from: &str, to: &str) -> Result<LikeOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let (lo, hi) = pair_key(from, to);
            let now = now_ts();

            // CAS: only a pending like initiated by the counterpart matches.
            let flipped = tx.execute(
                "UPDATE matches SET status = 'matched', updated_at = ?4
                 WHERE user_lo = ?1 AND user_hi = ?2 AND status = 'pending' AND initiator_id = ?3",
                rusqlite::params![lo, hi, to, now],
            )?;
            if flipped > 0 {
                let record = query_pair(&tx, &lo, &hi)?
                    .ok_or_else(|| anyhow::anyhow!("match row vanished mid-transaction"))?;
                tx.commit()?;
                return Ok(LikeOutcome::Matched(record));
            }

            let outcome = match query_pair(&tx, &lo, &hi)? {
                None => {
                    let id = Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO matches (id, user_lo, user_hi, initiator_id, status, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)",
                        rusqlite::params![id, lo, hi, from, now],
                    )?;
                    let record = query_pair(&tx, &lo, &hi)?
                        .ok_or_else(|| anyhow::anyhow!("match row vanished mid-transaction"))?;
                    LikeOutcome::Pending(record)
                }
                Some(existing) => match existing.status {
                    // Liking again is a no-op; already matched stays matched.
                    MatchStatus::Matched => LikeOutcome::Matched(existing),
                    MatchStatus::Pending => LikeOutcome::Pending(existing),
                    // A prior nope is silently superseded by a fresh like.
                    MatchStatus::Rejected => {
                        tx.execute(
                            "UPDATE matches SET status = 'pending', initiator_id = ?3, updated_at = ?4
                             WHERE user_lo = ?1 AND user_hi = ?2",
                            rusqlite::params![lo, hi, from, now],
                        )?;
                        let record = query_pair(&tx, &lo, &hi)?
                            .ok_or_else(|| anyhow::anyhow!("match row vanished mid-transaction"))?;
                        LikeOutcome::Pending(record)
                    }
                },
            };
            tx.commit()?;
            Ok(outcome)
        })
    }

    /// Record that `from` noped `to`. Any existing record for the pair — of
    /// any status — suppresses the write.
    pub fn nope(&self, from: &str, to: &str) -> Result<NopeOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let (lo, hi) = pair_key(from, to);

            if query_pair(&tx, &lo, &hi)?.is_some() {
                tx.commit()?;
                return Ok(NopeOutcome::AlreadyRecorded);
            }

            let id = Uuid::new_v4().to_string();
            let now = now_ts();
            tx.execute(
                "INSERT INTO matches (id, user_lo, user_hi, initiator_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'rejected', ?5, ?5)",
                rusqlite::params![id, lo, hi, from, now],
            )?;
            let record = query_pair(&tx, &lo, &hi)?
                .ok_or_else(|| anyhow::anyhow!("match row vanished mid-transaction"))?;
            tx.commit()?;
            Ok(NopeOutcome::Recorded(record))
        })
    }

    /// IDs the user should no longer see in discovery: counterparts of
    /// matched records always, counterparts of pending/rejected records only
    /// when the user initiated. Demo accounts are never suppressed.
    pub fn interacted_ids(&self, user_id: &str) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT CASE WHEN m.user_lo = ?1 THEN m.user_hi ELSE m.user_lo END AS other
                 FROM matches m
                 JOIN users u ON u.id = CASE WHEN m.user_lo = ?1 THEN m.user_hi ELSE m.user_lo END
                 WHERE (m.user_lo = ?1 OR m.user_hi = ?1)
                   AND u.is_demo = 0
                   AND (m.status = 'matched' OR m.initiator_id = ?1)",
            )?;
            let ids = stmt
                .query_map([user_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            ids.into_iter()
                .map(|s| s.parse().map_err(anyhow::Error::new))
                .collect()
        })
    }

    pub fn get_match(&self, id: &str) -> Result<Option<MatchRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_lo, user_hi, initiator_id, status, created_at, updated_at
                 FROM matches WHERE id = ?1",
            )?;
            let row = stmt.query_row([id], map_match_row).optional()?;
            row.map(record_from_row).transpose()
        })
    }

    /// Unmatch: unconditionally drop the record; messages cascade.
    pub fn delete_match(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM matches WHERE id = ?1", [id])?;
            Ok(deleted > 0)
        })
    }

    pub fn is_match_participant(&self, match_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM matches WHERE id = ?1 AND (user_lo = ?2 OR user_hi = ?2)",
                    rusqlite::params![match_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// The matched list: counterpart profile plus a last-message summary per
    /// match, most recently active first (matches with no messages last).
    pub fn matched_with_summaries(&self, user_id: &str) -> Result<Vec<MatchSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_lo, user_hi, initiator_id, status, created_at, updated_at
                 FROM matches
                 WHERE (user_lo = ?1 OR user_hi = ?1) AND status = 'matched'",
            )?;
            let rows = stmt
                .query_map([user_id], map_match_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut summaries = Vec::with_capacity(rows.len());
            for row in rows {
                let other_id = if row.user_lo == user_id {
                    row.user_hi.clone()
                } else {
                    row.user_lo.clone()
                };

                let Some(mut profile) = query_profile(conn, &other_id)? else {
                    // Counterpart deleted mid-query; their matches are about
                    // to cascade anyway.
                    continue;
                };
                profile.photos = query_photos(conn, &other_id)?;

                let last_message = query_last_message(conn, &row.id, user_id, &other_id)?;
                summaries.push(MatchSummary {
                    match_id: row.id.parse().map_err(anyhow::Error::new)?,
                    user: profile,
                    last_message,
                });
            }

            // Most recent conversation first; silent matches sink.
            summaries.sort_by_key(|s| {
                std::cmp::Reverse(s.last_message.as_ref().map(|m| m.created_at))
            });
            Ok(summaries)
        })
    }
}

fn map_match_row(row: &rusqlite::Row) -> rusqlite::Result<MatchRow> {
    Ok(MatchRow {
        id: row.get(0)?,
        user_lo: row.get(1)?,
        user_hi: row.get(2)?,
        initiator_id: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn record_from_row(row: MatchRow) -> Result<MatchRecord> {
    Ok(MatchRecord {
        id: row.id.parse().map_err(anyhow::Error::new)?,
        users: [
            row.user_lo.parse().map_err(anyhow::Error::new)?,
            row.user_hi.parse().map_err(anyhow::Error::new)?,
        ],
        initiator: row.initiator_id.parse().map_err(anyhow::Error::new)?,
        status: status_from_str(&row.status)?,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}

fn query_pair(conn: &Connection, lo: &str, hi: &str) -> Result<Option<MatchRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_lo, user_hi, initiator_id, status, created_at, updated_at
         FROM matches WHERE user_lo = ?1 AND user_hi = ?2",
    )?;
    let row = stmt
        .query_row(rusqlite::params![lo, hi], map_match_row)
        .optional()?;
    row.map(record_from_row).transpose()
}

/// Summary of the newest message in a match from the viewer's perspective:
/// "seen" means seen by the counterpart for outgoing messages, seen by the
/// viewer for incoming ones.
fn query_last_message(
    conn: &Connection,
    match_id: &str,
    viewer_id: &str,
    other_id: &str,
) -> Result<Option<LastMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, content, created_at
         FROM messages WHERE match_id = ?1
         ORDER BY created_at DESC, id DESC LIMIT 1",
    )?;
    let last: Option<(String, String, String, String)> = stmt
        .query_row([match_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .optional()?;

    let Some((message_id, sender_id, content, created_at)) = last else {
        return Ok(None);
    };

    let is_from_me = sender_id == viewer_id;
    let seen_by = if is_from_me { other_id } else { viewer_id };
    let seen: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM message_seen WHERE message_id = ?1 AND user_id = ?2",
            rusqlite::params![message_id, seen_by],
            |row| row.get(0),
        )
        .optional()?;

    Ok(Some(LastMessage {
        content,
        created_at: parse_ts(&created_at)?,
        is_from_me,
        seen: seen.is_some(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{mark_demo, seed_user, test_db};

    #[test]
    fn reciprocal_likes_close_into_one_match() {
        let db = test_db();
        let a = seed_user(&db, "ada");
        let b = seed_user(&db, "brie");

        let first = db.like(&a.to_string(), &b.to_string()).unwrap();
        assert!(matches!(first, LikeOutcome::Pending(_)));

        let second = db.like(&b.to_string(), &a.to_string()).unwrap();
        let LikeOutcome::Matched(record) = second else {
            panic!("expected mutual match");
        };
        assert_eq!(record.status, MatchStatus::Matched);
        assert_eq!(record.initiator, a);

        assert_eq!(db.interacted_ids(&a.to_string()).unwrap(), vec![b]);
        assert_eq!(db.interacted_ids(&b.to_string()).unwrap(), vec![a]);
    }

    #[test]
    fn suppression_is_per_initiator() {
        let db = test_db();
        let a = seed_user(&db, "ada");
        let b = seed_user(&db, "brie");

        db.like(&a.to_string(), &b.to_string()).unwrap();

        // A initiated, so A stops seeing B; B never acted and still sees A.
        assert_eq!(db.interacted_ids(&a.to_string()).unwrap(), vec![b]);
        assert!(db.interacted_ids(&b.to_string()).unwrap().is_empty());
    }

    #[test]
    fn second_nope_reports_already_recorded() {
        let db = test_db();
        let a = seed_user(&db, "ada");
        let b = seed_user(&db, "brie");

        let first = db.nope(&a.to_string(), &b.to_string()).unwrap();
        assert!(matches!(first, NopeOutcome::Recorded(_)));

        let second = db.nope(&a.to_string(), &b.to_string()).unwrap();
        assert!(matches!(second, NopeOutcome::AlreadyRecorded));

        // Also suppressed from the other direction.
        let reverse = db.nope(&b.to_string(), &a.to_string()).unwrap();
        assert!(matches!(reverse, NopeOutcome::AlreadyRecorded));
    }

    #[test]
    fn duplicate_like_does_not_duplicate_records() {
        let db = test_db();
        let a = seed_user(&db, "ada");
        let b = seed_user(&db, "brie");

        let first = db.like(&a.to_string(), &b.to_string()).unwrap();
        let LikeOutcome::Pending(first) = first else {
            panic!("expected pending");
        };
        let again = db.like(&a.to_string(), &b.to_string()).unwrap();
        let LikeOutcome::Pending(again) = again else {
            panic!("expected pending");
        };
        assert_eq!(first.id, again.id);
    }

    #[test]
    fn a_fresh_like_supersedes_a_rejection() {
        let db = test_db();
        let a = seed_user(&db, "ada");
        let b = seed_user(&db, "brie");

        db.nope(&a.to_string(), &b.to_string()).unwrap();
        let like = db.like(&b.to_string(), &a.to_string()).unwrap();
        let LikeOutcome::Pending(record) = like else {
            panic!("expected pending after superseding rejection");
        };
        assert_eq!(record.initiator, b);
        assert_eq!(record.status, MatchStatus::Pending);

        // And the mutual path still closes.
        let back = db.like(&a.to_string(), &b.to_string()).unwrap();
        assert!(matches!(back, LikeOutcome::Matched(_)));
    }

    #[test]
    fn superseding_a_rejection_hands_suppression_to_the_new_liker() {
        let db = test_db();
        let a = seed_user(&db, "ada");
        let b = seed_user(&db, "brie");

        db.nope(&a.to_string(), &b.to_string()).unwrap();
        assert_eq!(db.interacted_ids(&a.to_string()).unwrap(), vec![b]);

        // Brie's like replaces the rejected record; Ada loses her
        // suppression and sees Brie again until she acts.
        db.like(&b.to_string(), &a.to_string()).unwrap();
        assert!(db.interacted_ids(&a.to_string()).unwrap().is_empty());
        assert_eq!(db.interacted_ids(&b.to_string()).unwrap(), vec![a]);
    }

    #[test]
    fn demo_accounts_are_never_suppressed() {
        let db = test_db();
        let a = seed_user(&db, "ada");
        let demo = seed_user(&db, "demo-bot");
        mark_demo(&db, &demo.to_string());

        db.like(&a.to_string(), &demo.to_string()).unwrap();
        db.like(&demo.to_string(), &a.to_string()).unwrap();

        // Matched, yet the demo account stays visible to A. A, however, is a
        // normal account and disappears from the demo account's feed.
        assert!(db.interacted_ids(&a.to_string()).unwrap().is_empty());
        assert_eq!(db.interacted_ids(&demo.to_string()).unwrap(), vec![a]);
    }

    #[test]
    fn unmatch_drops_the_record() {
        let db = test_db();
        let a = seed_user(&db, "ada");
        let b = seed_user(&db, "brie");

        db.like(&a.to_string(), &b.to_string()).unwrap();
        let LikeOutcome::Matched(record) = db.like(&b.to_string(), &a.to_string()).unwrap() else {
            panic!("expected match");
        };

        assert!(db.delete_match(&record.id.to_string()).unwrap());
        assert!(db.get_match(&record.id.to_string()).unwrap().is_none());
        assert!(db.interacted_ids(&a.to_string()).unwrap().is_empty());
    }

    #[test]
    fn blocking_purges_matches_either_way() {
        let db = test_db();
        let a = seed_user(&db, "ada");
        let b = seed_user(&db, "brie");

        db.like(&a.to_string(), &b.to_string()).unwrap();
        db.like(&b.to_string(), &a.to_string()).unwrap();

        db.block_user(&b.to_string(), &a.to_string()).unwrap();
        assert!(db.interacted_ids(&a.to_string()).unwrap().is_empty());
        assert!(db.interacted_ids(&b.to_string()).unwrap().is_empty());

        // Idempotent.
        db.block_user(&b.to_string(), &a.to_string()).unwrap();
        let profile = db.get_profile(&b.to_string()).unwrap().unwrap();
        assert_eq!(profile.blocked_users, vec![a]);
    }
}
