use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use uuid::Uuid;

use kute_types::api::{AgeRange, Gender, GeoPoint, UpdateUserRequest, UserProfile};

use crate::models::{CredentialRow, gender_from_str, gender_to_str, now_ts, pair_key, parse_ts};
use crate::{Database, OptionalExt};

/// Everything needed to insert a fresh user row. Defaults mirror the mobile
/// client's registration payload: empty bio, ageRange 18-60, 100 km radius,
/// location unset.
pub struct NewUser<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub password_hash: &'a str,
    pub bio: &'a str,
    pub gender: Option<Gender>,
    pub interested_in: &'a [Gender],
    pub birth_date: Option<NaiveDate>,
    pub interests: &'a [String],
}

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser) -> Result<()> {
        let interested: Vec<&str> = user.interested_in.iter().map(|g| gender_to_str(*g)).collect();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, password, bio, gender, interested_in, birth_date, interests, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    user.id,
                    user.name,
                    user.password_hash,
                    user.bio,
                    user.gender.map(gender_to_str),
                    serde_json::to_string(&interested)?,
                    user.birth_date.map(|d| d.to_string()),
                    serde_json::to_string(user.interests)?,
                    now_ts(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_credentials_by_name(&self, name: &str) -> Result<Option<CredentialRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, password FROM users WHERE name = ?1",
                    [name],
                    |row| {
                        Ok(CredentialRow {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            password: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_name_by_id(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row("SELECT name FROM users WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(row)
        })
    }

    /// Full public profile (password never leaves this layer), including
    /// photos and the viewer's own blocklist.
    pub fn get_profile(&self, id: &str) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| {
            let Some(mut profile) = query_profile(conn, id)? else {
                return Ok(None);
            };
            profile.photos = query_photos(conn, id)?;
            profile.blocked_users = query_blocked(conn, id)?;
            Ok(Some(profile))
        })
    }

    /// Apply a partial profile update. Returns false if the user is unknown.
    pub fn update_user(&self, id: &str, update: &UpdateUserRequest) -> Result<bool> {
        self.with_conn(|conn| {
            let Some(current) = query_profile(conn, id)? else {
                return Ok(false);
            };

            let bio = update.bio.as_deref().unwrap_or(&current.bio);
            let gender = update.gender.or(current.gender);
            let interested_in = update
                .interested_in
                .as_deref()
                .unwrap_or(&current.interested_in);
            let birth_date = update.birth_date.or(current.birth_date);
            let location = update.location.unwrap_or(current.location);
            let interests = update.interests.as_deref().unwrap_or(&current.interests);
            let age_range = update.age_range.unwrap_or(current.age_range);
            let max_distance = update.max_distance.unwrap_or(current.max_distance);

            let interested: Vec<&str> = interested_in.iter().map(|g| gender_to_str(*g)).collect();
            conn.execute(
                "UPDATE users SET bio = ?2, gender = ?3, interested_in = ?4, birth_date = ?5,
                    longitude = ?6, latitude = ?7, interests = ?8, age_min = ?9, age_max = ?10,
                    max_distance_km = ?11
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    bio,
                    gender.map(gender_to_str),
                    serde_json::to_string(&interested)?,
                    birth_date.map(|d| d.to_string()),
                    location.longitude,
                    location.latitude,
                    serde_json::to_string(interests)?,
                    age_range.min,
                    age_range.max,
                    max_distance,
                ],
            )?;
            Ok(true)
        })
    }

    /// Flip the frozen flag. Returns the new value, or None for an unknown user.
    pub fn toggle_frozen(&self, id: &str) -> Result<Option<bool>> {
        self.with_conn(|conn| {
            let current: Option<bool> = conn
                .query_row("SELECT frozen FROM users WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(current) = current else {
                return Ok(None);
            };
            conn.execute(
                "UPDATE users SET frozen = ?2 WHERE id = ?1",
                rusqlite::params![id, !current],
            )?;
            Ok(Some(!current))
        })
    }

    /// Cascading account delete: every match containing the user goes (their
    /// messages follow via the FK cascade), then the user row itself (photos
    /// and blocklist cascade). Inbound blocklist entries pointing at the user
    /// are swept too.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM matches WHERE user_lo = ?1 OR user_hi = ?1",
                [id],
            )?;
            tx.execute("DELETE FROM blocked_users WHERE blocked_id = ?1", [id])?;
            let deleted = tx.execute("DELETE FROM users WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }

    // -- Photos --

    /// Append a photo URL at the end of the ordered list. Returns its position.
    pub fn add_photo(&self, user_id: &str, url: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let next: i64 = conn.query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM photos WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO photos (user_id, position, url) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, next, url],
            )?;
            Ok(next as usize)
        })
    }

    /// Remove the photo at `index` and compact the positions above it.
    /// Returns the removed URL so the caller can unlink the file.
    pub fn remove_photo(&self, user_id: &str, index: usize) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let url: Option<String> = tx
                .query_row(
                    "SELECT url FROM photos WHERE user_id = ?1 AND position = ?2",
                    rusqlite::params![user_id, index as i64],
                    |row| row.get(0),
                )
                .optional()?;
            if url.is_some() {
                tx.execute(
                    "DELETE FROM photos WHERE user_id = ?1 AND position = ?2",
                    rusqlite::params![user_id, index as i64],
                )?;
                tx.execute(
                    "UPDATE photos SET position = position - 1 WHERE user_id = ?1 AND position > ?2",
                    rusqlite::params![user_id, index as i64],
                )?;
            }
            tx.commit()?;
            Ok(url)
        })
    }

    // -- Blocking --

    /// Add to the blocklist (set semantics) and purge every match between the
    /// pair, whatever its status. Messages follow the match cascade.
    pub fn block_user(&self, blocker: &str, blocked: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO blocked_users (blocker_id, blocked_id) VALUES (?1, ?2)",
                rusqlite::params![blocker, blocked],
            )?;
            let (lo, hi) = pair_key(blocker, blocked);
            tx.execute(
                "DELETE FROM matches WHERE user_lo = ?1 AND user_hi = ?2",
                rusqlite::params![lo, hi],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    // -- Discovery --

    /// The database half of the discovery pipeline: excludes the viewer, their
    /// blocklist, and frozen accounts, and applies the gender preference when
    /// one is set. Geo radius, pagination, and the age post-filter are applied
    /// by the caller, which also removes already-interacted IDs.
    pub fn discovery_candidates(
        &self,
        viewer_id: &str,
        interested_in: &[Gender],
    ) -> Result<Vec<UserProfile>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, name, bio, gender, interested_in, birth_date, longitude, latitude,
                        interests, age_min, age_max, max_distance_km, frozen, is_demo, created_at
                 FROM users
                 WHERE id != ?1
                   AND frozen = 0
                   AND id NOT IN (SELECT blocked_id FROM blocked_users WHERE blocker_id = ?1)",
            );

            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
                vec![Box::new(viewer_id.to_string())];
            if !interested_in.is_empty() {
                let placeholders: Vec<String> = (0..interested_in.len())
                    .map(|i| format!("?{}", i + 2))
                    .collect();
                sql.push_str(&format!(" AND gender IN ({})", placeholders.join(", ")));
                for g in interested_in {
                    params.push(Box::new(gender_to_str(*g).to_string()));
                }
            }

            let mut stmt = conn.prepare(&sql)?;
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let mut profiles = stmt
                .query_map(param_refs.as_slice(), map_profile_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            // Candidate rows only carry public data, so the blocklist stays
            // empty; photos are filled in with one batched query.
            let ids: Vec<String> = profiles.iter().map(|p| p.id.to_string()).collect();
            let mut photos = query_photos_batch(conn, &ids)?;
            for profile in &mut profiles {
                if let Some(list) = photos.remove(&profile.id.to_string()) {
                    profile.photos = list;
                }
            }

            Ok(profiles)
        })
    }
}

fn map_profile_row(row: &rusqlite::Row) -> rusqlite::Result<UserProfile> {
    let to_sql_err = |e: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
    };

    let id: String = row.get(0)?;
    let gender: Option<String> = row.get(3)?;
    let interested_raw: String = row.get(4)?;
    let birth_date: Option<String> = row.get(5)?;
    let interests_raw: String = row.get(8)?;
    let created_at: String = row.get(14)?;

    let interested_names: Vec<String> = serde_json::from_str(&interested_raw)
        .map_err(|e| to_sql_err(anyhow::Error::new(e)))?;
    let mut interested_in = Vec::with_capacity(interested_names.len());
    for name in &interested_names {
        interested_in.push(gender_from_str(name).map_err(to_sql_err)?);
    }

    Ok(UserProfile {
        id: id.parse().map_err(|e| to_sql_err(anyhow::Error::new(e)))?,
        name: row.get(1)?,
        bio: row.get(2)?,
        photos: Vec::new(),
        gender: match gender {
            Some(g) => Some(gender_from_str(&g).map_err(to_sql_err)?),
            None => None,
        },
        interested_in,
        birth_date: match birth_date {
            Some(d) => Some(d.parse().map_err(|e| to_sql_err(anyhow::Error::new(e)))?),
            None => None,
        },
        location: GeoPoint {
            longitude: row.get(6)?,
            latitude: row.get(7)?,
        },
        interests: serde_json::from_str(&interests_raw)
            .map_err(|e| to_sql_err(anyhow::Error::new(e)))?,
        age_range: AgeRange {
            min: row.get::<_, i64>(9)? as u8,
            max: row.get::<_, i64>(10)? as u8,
        },
        max_distance: row.get(11)?,
        blocked_users: Vec::new(),
        frozen: row.get(12)?,
        is_demo: row.get(13)?,
        created_at: parse_ts(&created_at).map_err(to_sql_err)?,
    })
}

pub(crate) fn query_profile(conn: &Connection, id: &str) -> Result<Option<UserProfile>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, bio, gender, interested_in, birth_date, longitude, latitude,
                interests, age_min, age_max, max_distance_km, frozen, is_demo, created_at
         FROM users WHERE id = ?1",
    )?;
    let row = stmt.query_row([id], map_profile_row).optional()?;
    Ok(row)
}

pub(crate) fn query_photos(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT url FROM photos WHERE user_id = ?1 ORDER BY position")?;
    let urls = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(urls)
}

fn query_blocked(conn: &Connection, user_id: &str) -> Result<Vec<Uuid>> {
    let mut stmt =
        conn.prepare("SELECT blocked_id FROM blocked_users WHERE blocker_id = ?1")?;
    let ids = stmt
        .query_map([user_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    ids.into_iter()
        .map(|s| s.parse().map_err(anyhow::Error::new))
        .collect()
}

/// Batch-fetch ordered photo lists for a set of user IDs.
fn query_photos_batch(
    conn: &Connection,
    user_ids: &[String],
) -> Result<HashMap<String, Vec<String>>> {
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=user_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT user_id, url FROM photos WHERE user_id IN ({}) ORDER BY user_id, position",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = user_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    let rows = stmt.query_map(params.as_slice(), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (user_id, url) = row?;
        map.entry(user_id).or_default().push(url);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_user, seed_user_with, test_db};

    #[test]
    fn discovery_excludes_self_blocked_and_frozen() {
        let db = test_db();
        let viewer = seed_user(&db, "viewer");
        let blocked = seed_user(&db, "blocked");
        let frozen = seed_user(&db, "frozen");
        let visible = seed_user(&db, "visible");

        db.block_user(&viewer.to_string(), &blocked.to_string())
            .unwrap();
        assert_eq!(db.toggle_frozen(&frozen.to_string()).unwrap(), Some(true));

        let candidates = db
            .discovery_candidates(&viewer.to_string(), &[])
            .unwrap();
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![visible]);
    }

    #[test]
    fn discovery_applies_gender_preference_only_when_set() {
        let db = test_db();
        let viewer = seed_user(&db, "viewer");
        let f = seed_user_with(&db, "f", Some(Gender::Female), &[], None);
        let m = seed_user_with(&db, "m", Some(Gender::Male), &[], None);
        let unknown = seed_user(&db, "unknown");

        let all = db.discovery_candidates(&viewer.to_string(), &[]).unwrap();
        assert_eq!(all.len(), 3);

        let women = db
            .discovery_candidates(&viewer.to_string(), &[Gender::Female])
            .unwrap();
        let ids: Vec<Uuid> = women.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![f]);

        let either = db
            .discovery_candidates(&viewer.to_string(), &[Gender::Female, Gender::Male])
            .unwrap();
        let mut ids: Vec<Uuid> = either.iter().map(|c| c.id).collect();
        ids.sort();
        let mut expected = vec![f, m];
        expected.sort();
        assert_eq!(ids, expected);
        assert!(!either.iter().any(|c| c.id == unknown));
    }

    #[test]
    fn photo_positions_stay_ordered_and_compact() {
        let db = test_db();
        let user = seed_user(&db, "ada");
        let id = user.to_string();

        assert_eq!(db.add_photo(&id, "/uploads/a.jpg").unwrap(), 0);
        assert_eq!(db.add_photo(&id, "/uploads/b.jpg").unwrap(), 1);
        assert_eq!(db.add_photo(&id, "/uploads/c.jpg").unwrap(), 2);

        let removed = db.remove_photo(&id, 1).unwrap();
        assert_eq!(removed.as_deref(), Some("/uploads/b.jpg"));
        assert!(db.remove_photo(&id, 5).unwrap().is_none());

        let profile = db.get_profile(&id).unwrap().unwrap();
        assert_eq!(profile.photos, ["/uploads/a.jpg", "/uploads/c.jpg"]);

        // Next upload lands at the compacted end.
        assert_eq!(db.add_photo(&id, "/uploads/d.jpg").unwrap(), 2);
    }

    #[test]
    fn partial_update_leaves_absent_fields_alone() {
        let db = test_db();
        let user = seed_user_with(&db, "ada", Some(Gender::Female), &[Gender::Male], None);
        let id = user.to_string();

        let update = UpdateUserRequest {
            bio: Some("hello".into()),
            max_distance: Some(25.0),
            ..Default::default()
        };
        assert!(db.update_user(&id, &update).unwrap());

        let profile = db.get_profile(&id).unwrap().unwrap();
        assert_eq!(profile.bio, "hello");
        assert_eq!(profile.max_distance, 25.0);
        assert_eq!(profile.gender, Some(Gender::Female));
        assert_eq!(profile.interested_in, vec![Gender::Male]);
        assert_eq!(profile.age_range, AgeRange { min: 18, max: 60 });

        assert!(!db.update_user("not-a-user", &UpdateUserRequest::default()).unwrap());
    }
}
