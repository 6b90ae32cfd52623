//! Shared helpers for the storage tests.

use chrono::NaiveDate;
use uuid::Uuid;

use kute_types::api::Gender;

use crate::Database;
use crate::users::NewUser;

pub fn test_db() -> Database {
    Database::open_in_memory().expect("in-memory db")
}

pub fn seed_user(db: &Database, name: &str) -> Uuid {
    seed_user_with(db, name, None, &[], None)
}

pub fn seed_user_with(
    db: &Database,
    name: &str,
    gender: Option<Gender>,
    interested_in: &[Gender],
    birth_date: Option<NaiveDate>,
) -> Uuid {
    let id = Uuid::new_v4();
    db.create_user(&NewUser {
        id: &id.to_string(),
        name,
        password_hash: "not-a-real-hash",
        bio: "",
        gender,
        interested_in,
        birth_date,
        interests: &[],
    })
    .expect("seed user");
    id
}

pub fn mark_demo(db: &Database, id: &str) {
    db.with_conn(|conn| {
        conn.execute("UPDATE users SET is_demo = 1 WHERE id = ?1", [id])?;
        Ok(())
    })
    .expect("mark demo");
}
