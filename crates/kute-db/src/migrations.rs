use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            bio             TEXT NOT NULL DEFAULT '',
            gender          TEXT,
            interested_in   TEXT NOT NULL DEFAULT '[]',
            birth_date      TEXT,
            longitude       REAL NOT NULL DEFAULT 0,
            latitude        REAL NOT NULL DEFAULT 0,
            interests       TEXT NOT NULL DEFAULT '[]',
            age_min         INTEGER NOT NULL DEFAULT 18,
            age_max         INTEGER NOT NULL DEFAULT 60,
            max_distance_km REAL NOT NULL DEFAULT 100,
            frozen          INTEGER NOT NULL DEFAULT 0,
            is_demo         INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS photos (
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            position    INTEGER NOT NULL,
            url         TEXT NOT NULL,
            PRIMARY KEY (user_id, position)
        );

        CREATE TABLE IF NOT EXISTS blocked_users (
            blocker_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            blocked_id  TEXT NOT NULL,
            PRIMARY KEY (blocker_id, blocked_id)
        );

        -- The unordered pair is stored sorted (user_lo < user_hi) so the
        -- unique index guarantees at most one record per pair. Who acted
        -- first is an explicit column, never an ordering convention.
        CREATE TABLE IF NOT EXISTS matches (
            id              TEXT PRIMARY KEY,
            user_lo         TEXT NOT NULL REFERENCES users(id),
            user_hi         TEXT NOT NULL REFERENCES users(id),
            initiator_id    TEXT NOT NULL,
            status          TEXT NOT NULL CHECK (status IN ('pending','matched','rejected')),
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            UNIQUE (user_lo, user_hi)
        );

        CREATE INDEX IF NOT EXISTS idx_matches_user_lo ON matches(user_lo);
        CREATE INDEX IF NOT EXISTS idx_matches_user_hi ON matches(user_hi);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            match_id    TEXT NOT NULL REFERENCES matches(id) ON DELETE CASCADE,
            sender_id   TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_match
            ON messages(match_id, created_at);

        CREATE TABLE IF NOT EXISTS message_seen (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
