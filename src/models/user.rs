use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Staff roles, from platform owner down to warehouse staff.
/// Stored as snake_case text in the `app_user.role` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    SystemOwner,
    Admin,
    Manager,
    Accountant,
    TechnicalStaff,
    Cleaner,
    Storekeeper,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::SystemOwner => "system_owner",
            UserRole::Admin => "admin",
            UserRole::Manager => "manager",
            UserRole::Accountant => "accountant",
            UserRole::TechnicalStaff => "technical_staff",
            UserRole::Cleaner => "cleaner",
            UserRole::Storekeeper => "storekeeper",
        }
    }

    /// Parse a role from its stored text form. Unknown values return `None`
    /// so callers deny by default rather than guessing.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system_owner" => Some(UserRole::SystemOwner),
            "admin" => Some(UserRole::Admin),
            "manager" => Some(UserRole::Manager),
            "accountant" => Some(UserRole::Accountant),
            "technical_staff" => Some(UserRole::TechnicalStaff),
            "cleaner" => Some(UserRole::Cleaner),
            "storekeeper" => Some(UserRole::Storekeeper),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Pending,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
            UserStatus::Pending => "pending",
            UserStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(UserStatus::Active),
            "suspended" => Some(UserStatus::Suspended),
            "pending" => Some(UserStatus::Pending),
            "disabled" => Some(UserStatus::Disabled),
            _ => None,
        }
    }
}

/// A staff account. Only `system_owner` accounts may exist without an
/// organization; all other roles belong to exactly one.
#[derive(Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub email: String,
    pub full_name: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    pub two_factor_enabled: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
