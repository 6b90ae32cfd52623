use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared across kute-api (REST middleware) and kute-gateway
/// (WebSocket authentication). Canonical definition lives here in kute-types
/// to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

// -- Profile attributes --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// Longitude/latitude pair. `(0, 0)` is the "location never set" sentinel
/// carried over from the mobile client's registration default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoPoint {
    pub const UNSET: GeoPoint = GeoPoint {
        longitude: 0.0,
        latitude: 0.0,
    };

    pub fn is_unset(&self) -> bool {
        self.longitude == 0.0 && self.latitude == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRange {
    pub min: u8,
    pub max: u8,
}

impl Default for AgeRange {
    fn default() -> Self {
        AgeRange { min: 18, max: 60 }
    }
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub interested_in: Option<Vec<Gender>>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub interests: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

// -- Users --

/// Public view of a user: everything stored except the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub bio: String,
    pub photos: Vec<String>,
    pub gender: Option<Gender>,
    pub interested_in: Vec<Gender>,
    pub birth_date: Option<NaiveDate>,
    pub location: GeoPoint,
    pub interests: Vec<String>,
    pub age_range: AgeRange,
    /// Kilometers.
    pub max_distance: f64,
    pub blocked_users: Vec<Uuid>,
    pub frozen: bool,
    pub is_demo: bool,
    pub created_at: DateTime<Utc>,
}

/// Partial profile update — absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub bio: Option<String>,
    pub gender: Option<Gender>,
    pub interested_in: Option<Vec<Gender>>,
    pub birth_date: Option<NaiveDate>,
    pub location: Option<GeoPoint>,
    pub interests: Option<Vec<String>>,
    pub age_range: Option<AgeRange>,
    pub max_distance: Option<f64>,
}

// -- Matches --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Matched,
    Rejected,
}

/// A stored interaction outcome between two users. The pair is unordered;
/// `initiator` identifies who acted first (an explicit field, not an
/// array-position convention).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub id: Uuid,
    pub users: [Uuid; 2],
    pub initiator: Uuid,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LikeRequest {
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub matched: bool,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_record: Option<MatchRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like: Option<MatchRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NopeResponse {
    pub rejected: bool,
    /// True when a record for this pair already existed and nothing was written.
    pub existing: bool,
}

/// One entry of the matched list: counterpart profile plus a summary of the
/// latest message, enough to render "seen" ticks without loading history.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub match_id: Uuid,
    pub user: UserProfile,
    pub last_message: Option<LastMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_from_me: bool,
    pub seen: bool,
}

// -- Messages --

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: Uuid,
    pub match_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub content: String,
    pub seen_by: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

// -- Vibe analysis --

/// One line of conversation handed to the analysis collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLine {
    pub sender_name: String,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// Optional client-supplied recent window; the server falls back to the
    /// last 20 persisted messages when absent.
    #[serde(default)]
    pub messages: Option<Vec<ChatLine>>,
}
