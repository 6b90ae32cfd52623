use std::collections::HashMap;

use anyhow::{Result, anyhow};
use rusqlite::Connection;
use uuid::Uuid;

use kute_types::api::{ChatLine, MessageResponse};

use crate::models::{MessageRow, now_ts, parse_ts};
use crate::{Database, OptionalExt};

impl Database {
    /// Persist a new message with an empty seen set and return the stored
    /// record as the API sees it.
    pub fn append_message(
        &self,
        match_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageResponse> {
        self.with_conn(|conn| {
            let id = Uuid::new_v4().to_string();
            let now = now_ts();
            conn.execute(
                "INSERT INTO messages (id, match_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, match_id, sender_id, content, now],
            )?;

            let sender_name: String = conn
                .query_row("SELECT name FROM users WHERE id = ?1", [sender_id], |row| {
                    row.get(0)
                })
                .optional()?
                .unwrap_or_else(|| "unknown".to_string());

            Ok(MessageResponse {
                id: id.parse().map_err(anyhow::Error::new)?,
                match_id: match_id.parse().map_err(anyhow::Error::new)?,
                sender_id: sender_id.parse().map_err(anyhow::Error::new)?,
                sender_name,
                content: content.to_string(),
                seen_by: Vec::new(),
                created_at: parse_ts(&now)?,
            })
        })
    }

    /// All messages for a match, oldest first, sender names resolved.
    /// A pure read: marking messages seen is `mark_seen`, a separate call.
    pub fn list_messages(&self, match_id: &str) -> Result<Vec<MessageResponse>> {
        self.with_conn(|conn| {
            let rows = query_messages(conn, match_id)?;

            let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let mut seen_map = query_seen_for_messages(conn, &message_ids)?;

            rows.into_iter()
                .map(|row| {
                    let seen_by = seen_map.remove(&row.id).unwrap_or_default();
                    response_from_row(row, seen_by)
                })
                .collect()
        })
    }

    /// Mark every message in the match not authored by `viewer_id` as seen by
    /// them. `INSERT OR IGNORE` keeps repeat calls from growing the set.
    /// Returns how many messages were newly marked.
    pub fn mark_seen(&self, match_id: &str, viewer_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO message_seen (message_id, user_id)
                 SELECT id, ?2 FROM messages WHERE match_id = ?1 AND sender_id != ?2",
                rusqlite::params![match_id, viewer_id],
            )?;
            Ok(inserted)
        })
    }

    /// The last `limit` messages as sender-name/content lines, oldest first —
    /// the window handed to the vibe-analysis collaborator.
    pub fn recent_chat_lines(&self, match_id: &str, limit: u32) -> Result<Vec<ChatLine>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.name, m.content
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE m.match_id = ?1
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?2",
            )?;
            let mut lines = stmt
                .query_map(rusqlite::params![match_id, limit], |row| {
                    Ok(ChatLine {
                        sender_name: row
                            .get::<_, Option<String>>(0)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        content: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            lines.reverse();
            Ok(lines)
        })
    }
}

fn query_messages(conn: &Connection, match_id: &str) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch sender_name in a single query (eliminates N+1)
    let mut stmt = conn.prepare(
        "SELECT m.id, m.match_id, m.sender_id, u.name, m.content, m.created_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.match_id = ?1
         ORDER BY m.created_at ASC, m.id ASC",
    )?;

    let rows = stmt
        .query_map([match_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                match_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_name: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| "unknown".to_string()),
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Batch-fetch the seen sets for a set of message IDs.
fn query_seen_for_messages(
    conn: &Connection,
    message_ids: &[String],
) -> Result<HashMap<String, Vec<Uuid>>> {
    if message_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT message_id, user_id FROM message_seen WHERE message_id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let mut map: HashMap<String, Vec<Uuid>> = HashMap::new();
    let rows = stmt.query_map(params.as_slice(), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (message_id, user_id) = row?;
        let uid: Uuid = user_id.parse().map_err(anyhow::Error::new)?;
        map.entry(message_id).or_default().push(uid);
    }
    Ok(map)
}

fn response_from_row(row: MessageRow, seen_by: Vec<Uuid>) -> Result<MessageResponse> {
    Ok(MessageResponse {
        id: row
            .id
            .parse()
            .map_err(|e| anyhow!("corrupt message id '{}': {}", row.id, e))?,
        match_id: row.match_id.parse().map_err(anyhow::Error::new)?,
        sender_id: row.sender_id.parse().map_err(anyhow::Error::new)?,
        sender_name: row.sender_name,
        content: row.content,
        seen_by,
        created_at: parse_ts(&row.created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::matches::LikeOutcome;
    use crate::testutil::{seed_user, test_db};

    fn matched_pair(db: &crate::Database) -> (uuid::Uuid, uuid::Uuid, String) {
        let a = seed_user(db, "ada");
        let b = seed_user(db, "brie");
        db.like(&a.to_string(), &b.to_string()).unwrap();
        let LikeOutcome::Matched(record) = db.like(&b.to_string(), &a.to_string()).unwrap() else {
            panic!("expected match");
        };
        (a, b, record.id.to_string())
    }

    #[test]
    fn messages_come_back_chronological_with_names() {
        let db = test_db();
        let (a, b, match_id) = matched_pair(&db);

        db.append_message(&match_id, &a.to_string(), "hey").unwrap();
        db.append_message(&match_id, &b.to_string(), "hi yourself")
            .unwrap();
        db.append_message(&match_id, &a.to_string(), "coffee?").unwrap();

        let messages = db.list_messages(&match_id).unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["hey", "hi yourself", "coffee?"]);
        assert_eq!(messages[0].sender_name, "ada");
        assert_eq!(messages[1].sender_name, "brie");
    }

    #[test]
    fn mark_seen_is_idempotent_and_skips_own_messages() {
        let db = test_db();
        let (a, b, match_id) = matched_pair(&db);

        db.append_message(&match_id, &a.to_string(), "hey").unwrap();
        db.append_message(&match_id, &b.to_string(), "hi").unwrap();

        // B sees only A's message, once.
        assert_eq!(db.mark_seen(&match_id, &b.to_string()).unwrap(), 1);
        assert_eq!(db.mark_seen(&match_id, &b.to_string()).unwrap(), 0);

        let messages = db.list_messages(&match_id).unwrap();
        assert_eq!(messages[0].seen_by, vec![b]);
        assert!(messages[1].seen_by.is_empty());
    }

    #[test]
    fn last_message_summary_tracks_seen_ticks() {
        let db = test_db();
        let (a, b, match_id) = matched_pair(&db);

        db.append_message(&match_id, &a.to_string(), "hey").unwrap();

        // From A's side: own message, not yet seen by B.
        let summaries = db.matched_with_summaries(&a.to_string()).unwrap();
        let last = summaries[0].last_message.as_ref().unwrap();
        assert!(last.is_from_me);
        assert!(!last.seen);

        db.mark_seen(&match_id, &b.to_string()).unwrap();
        let summaries = db.matched_with_summaries(&a.to_string()).unwrap();
        assert!(summaries[0].last_message.as_ref().unwrap().seen);

        // From B's side it is an incoming, already-read message.
        let summaries = db.matched_with_summaries(&b.to_string()).unwrap();
        let last = summaries[0].last_message.as_ref().unwrap();
        assert!(!last.is_from_me);
        assert!(last.seen);
    }

    #[test]
    fn recent_chat_lines_are_oldest_first_and_windowed() {
        let db = test_db();
        let (a, b, match_id) = matched_pair(&db);

        for i in 0..5 {
            let sender = if i % 2 == 0 { a } else { b };
            db.append_message(&match_id, &sender.to_string(), &format!("msg {}", i))
                .unwrap();
        }

        let lines = db.recent_chat_lines(&match_id, 3).unwrap();
        let contents: Vec<&str> = lines.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, ["msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn deleting_a_user_cascades_through_matches_and_messages() {
        let db = test_db();
        let (a, _b, match_id) = matched_pair(&db);
        db.append_message(&match_id, &a.to_string(), "hey").unwrap();

        assert!(db.delete_user(&a.to_string()).unwrap());

        assert!(db.get_match(&match_id).unwrap().is_none());
        assert!(db.list_messages(&match_id).unwrap().is_empty());
        let orphaned: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM messages",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(orphaned, 0);
    }
}
