//! Core types used throughout Gatekeep.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unknown role name on the wire or in configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

/// Unique identifier of an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Create a new user ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Role of an authenticated principal.
///
/// Closed set: every role has exactly one default view, see [`Role::default_view`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    /// Practitioner keeping daily records.
    Participant,
    /// Guides a group of participants.
    Mentor,
    /// Oversees the mentors of a region.
    RegionalCoordinator,
    /// Senior guide with read access across regions.
    SeniorAdvisor,
    /// Full administrative access.
    Administrator,
}

impl Role {
    /// Every role, in ascending order of reach.
    pub const ALL: [Self; 5] = [
        Self::Participant,
        Self::Mentor,
        Self::RegionalCoordinator,
        Self::SeniorAdvisor,
        Self::Administrator,
    ];

    /// Canonical wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Participant => "Participant",
            Self::Mentor => "Mentor",
            Self::RegionalCoordinator => "RegionalCoordinator",
            Self::SeniorAdvisor => "SeniorAdvisor",
            Self::Administrator => "Administrator",
        }
    }

    /// The view a principal with this role lands on after login, and is
    /// redirected to when a view denies them.
    #[must_use]
    pub fn default_view(self) -> View {
        let path = match self {
            Self::Participant => "/dashboard/participant",
            Self::Mentor => "/dashboard/mentor",
            Self::RegionalCoordinator => "/dashboard/coordinator",
            Self::SeniorAdvisor => "/dashboard/advisor",
            Self::Administrator => "/dashboard/admin",
        };
        View::new(path)
    }

    /// Check if this role has admin privileges.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Administrator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = UnknownRole;

    /// Case-insensitive; `_`, `-` and spaces are ignored, so
    /// `regional_coordinator` and `RegionalCoordinator` are the same role.
    /// The legacy backend names (`Saalik`, `Murabi`, `Masool`, `Sheikh`)
    /// are accepted too.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        match folded.as_str() {
            "participant" | "saalik" => Ok(Self::Participant),
            "mentor" | "murabi" => Ok(Self::Mentor),
            "regionalcoordinator" | "coordinator" | "masool" => Ok(Self::RegionalCoordinator),
            "senioradvisor" | "advisor" | "sheikh" => Ok(Self::SeniorAdvisor),
            "administrator" | "admin" => Ok(Self::Administrator),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

/// Authenticated principal as reported by the identity provider.
///
/// Replaced wholesale on login, verification and logout; never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Unique user ID.
    #[serde(alias = "_id", alias = "user_id")]
    pub id: UserId,

    /// Name shown to the user.
    #[serde(alias = "name", alias = "displayName")]
    pub display_name: String,

    /// Contact e-mail, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Role used for access decisions.
    pub role: Role,

    /// Opaque progression attribute (e.g. a level), passed through untouched.
    #[serde(default, alias = "level", skip_serializing_if = "Option::is_none")]
    pub progression: Option<serde_json::Value>,
}

impl Identity {
    /// Create an identity without e-mail or progression.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
            email: None,
            role,
            progression: None,
        }
    }
}

/// A navigable view, identified by its path (e.g. `/dashboard/mentor`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct View(pub String);

impl View {
    /// Create a view from a path. A missing leading `/` is added and a
    /// trailing `/` is dropped.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let trimmed = path.trim().trim_end_matches('/');
        if trimmed.starts_with('/') {
            Self(trimmed.to_string())
        } else {
            Self(format!("/{trimmed}"))
        }
    }

    /// The view path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for View {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing_is_lenient() {
        assert_eq!("Participant".parse::<Role>().unwrap(), Role::Participant);
        assert_eq!("mentor".parse::<Role>().unwrap(), Role::Mentor);
        assert_eq!(
            "regional_coordinator".parse::<Role>().unwrap(),
            Role::RegionalCoordinator
        );
        assert_eq!("Senior Advisor".parse::<Role>().unwrap(), Role::SeniorAdvisor);
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Administrator);
        assert!("guest".parse::<Role>().is_err());
    }

    #[test]
    fn test_legacy_role_names() {
        assert_eq!("Saalik".parse::<Role>().unwrap(), Role::Participant);
        assert_eq!("Murabi".parse::<Role>().unwrap(), Role::Mentor);
        assert_eq!("masool".parse::<Role>().unwrap(), Role::RegionalCoordinator);
        assert_eq!("SHEIKH".parse::<Role>().unwrap(), Role::SeniorAdvisor);

        let identity: Identity = serde_json::from_value(serde_json::json!({
            "id": "u-3",
            "name": "Yusuf",
            "role": "Saalik"
        }))
        .unwrap();
        assert_eq!(identity.role, Role::Participant);
    }

    #[test]
    fn test_every_role_has_distinct_default_view() {
        let mut views: Vec<View> = Role::ALL.iter().map(|r| r.default_view()).collect();
        views.sort();
        views.dedup();
        assert_eq!(views.len(), Role::ALL.len());
    }

    #[test]
    fn test_identity_from_provider_json() {
        let json = serde_json::json!({
            "id": "u-17",
            "name": "Ahmad",
            "email": "ahmad@example.com",
            "role": "Participant",
            "level": 3
        });

        let identity: Identity = serde_json::from_value(json).unwrap();
        assert_eq!(identity.id.as_ref(), "u-17");
        assert_eq!(identity.display_name, "Ahmad");
        assert_eq!(identity.role, Role::Participant);
        assert_eq!(identity.progression, Some(serde_json::json!(3)));
    }

    #[test]
    fn test_identity_with_unknown_role_is_rejected() {
        let json = serde_json::json!({ "id": "u-1", "name": "X", "role": "Guest" });
        assert!(serde_json::from_value::<Identity>(json).is_err());
    }

    #[test]
    fn test_view_normalization() {
        assert_eq!(View::new("dashboard/").path(), "/dashboard");
        assert_eq!(View::new("/login").path(), "/login");
    }
}
