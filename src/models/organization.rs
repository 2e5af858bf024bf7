use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant activation status. Members of an organization outside
/// {active, trial} cannot authorize requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationStatus {
    Active,
    Trial,
    Suspended,
    Cancelled,
}

impl OrganizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationStatus::Active => "active",
            OrganizationStatus::Trial => "trial",
            OrganizationStatus::Suspended => "suspended",
            OrganizationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(OrganizationStatus::Active),
            "trial" => Some(OrganizationStatus::Trial),
            "suspended" => Some(OrganizationStatus::Suspended),
            "cancelled" => Some(OrganizationStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether members of an organization in this status may use the API.
    pub fn is_operational(&self) -> bool {
        matches!(self, OrganizationStatus::Active | OrganizationStatus::Trial)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub status: OrganizationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
