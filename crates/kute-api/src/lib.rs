pub mod auth;
pub mod discovery;
pub mod error;
pub mod matches;
pub mod messages;
pub mod middleware;
pub mod photos;
pub mod users;
