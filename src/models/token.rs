use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A server-side record of an issued bearer token. The raw token is never
/// stored; only its SHA-256 digest. A token is usable while
/// `now < expires_at` and `revoked` is false. The hourly scheduler sweep
/// deletes rows past expiry.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}
