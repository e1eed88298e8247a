//! Permission levels and the precedence rule that combines them.
//!
//! Access is decided by three layers, checked in order:
//! 1. The user's admin flag, which grants read-write everywhere.
//! 2. The storage-level grant, the default for every bucket of a storage.
//!    A missing grant counts as [`PermissionLevel::None`] and closes the
//!    whole storage, bucket overrides included.
//! 3. The bucket-level override, which replaces the storage default for that
//!    one bucket in both directions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a user account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a storage configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(pub i64);

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Access level held by a user on a storage or bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionLevel {
    /// No access. The resource is hidden.
    #[default]
    #[serde(rename = "none")]
    None,
    /// List and download.
    #[serde(rename = "read")]
    Read,
    /// Upload, delete and modify.
    #[serde(rename = "read-write")]
    ReadWrite,
}

impl PermissionLevel {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "read" => Ok(Self::Read),
            "read-write" => Ok(Self::ReadWrite),
            _ => Err(crate::Error::InvalidPermission(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
            Self::ReadWrite => "read-write",
        }
    }

    /// Check if this level implies another level.
    pub fn implies(&self, other: &Self) -> bool {
        match self {
            Self::ReadWrite => true,
            Self::Read => matches!(other, Self::Read | Self::None),
            Self::None => matches!(other, Self::None),
        }
    }

    pub fn can_access(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn can_read(&self) -> bool {
        self.implies(&Self::Read)
    }

    pub fn can_write(&self) -> bool {
        matches!(self, Self::ReadWrite)
    }

    /// Check this level against an optional minimum.
    ///
    /// Without a minimum any level other than `None` qualifies.
    pub fn meets_minimum(&self, minimum: Option<PermissionLevel>) -> bool {
        match minimum {
            Some(Self::Read) => self.can_read(),
            Some(Self::ReadWrite) => self.can_write(),
            Some(Self::None) | None => self.can_access(),
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The identity an access check is performed for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl User {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id: UserId(id),
            username: username.into(),
            is_admin: false,
        }
    }

    pub fn admin(id: i64, username: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::new(id, username)
        }
    }
}

/// Combine the three permission layers into an effective level.
///
/// This is the only place the precedence rule lives. Both single-bucket
/// checks and bulk bucket filtering go through it.
pub fn resolve_level(
    is_admin: bool,
    storage_grant: Option<PermissionLevel>,
    bucket_override: Option<PermissionLevel>,
) -> PermissionLevel {
    if is_admin {
        return PermissionLevel::ReadWrite;
    }

    let storage_level = storage_grant.unwrap_or_default();
    if storage_level == PermissionLevel::None {
        return PermissionLevel::None;
    }

    bucket_override.unwrap_or(storage_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVELS: [PermissionLevel; 3] = [
        PermissionLevel::None,
        PermissionLevel::Read,
        PermissionLevel::ReadWrite,
    ];

    fn optional_levels() -> Vec<Option<PermissionLevel>> {
        std::iter::once(None).chain(LEVELS.map(Some)).collect()
    }

    #[test]
    fn test_admin_is_read_write_regardless_of_grants() {
        for storage in optional_levels() {
            for bucket in optional_levels() {
                assert_eq!(
                    resolve_level(true, storage, bucket),
                    PermissionLevel::ReadWrite,
                    "admin with storage={storage:?} bucket={bucket:?}"
                );
            }
        }
    }

    #[test]
    fn test_closed_storage_makes_overrides_inert() {
        for storage in [None, Some(PermissionLevel::None)] {
            for bucket in optional_levels() {
                assert_eq!(
                    resolve_level(false, storage, bucket),
                    PermissionLevel::None,
                    "storage={storage:?} bucket={bucket:?}"
                );
            }
        }
    }

    #[test]
    fn test_override_replaces_storage_default_both_ways() {
        let read = Some(PermissionLevel::Read);
        assert_eq!(
            resolve_level(false, read, Some(PermissionLevel::ReadWrite)),
            PermissionLevel::ReadWrite
        );
        assert_eq!(resolve_level(false, read, None), PermissionLevel::Read);

        let rw = Some(PermissionLevel::ReadWrite);
        assert_eq!(
            resolve_level(false, rw, Some(PermissionLevel::None)),
            PermissionLevel::None
        );
        assert_eq!(
            resolve_level(false, rw, Some(PermissionLevel::Read)),
            PermissionLevel::Read
        );
    }

    #[test]
    fn test_parse_round_trips_wire_names() {
        for level in LEVELS {
            assert_eq!(PermissionLevel::parse(level.as_str()).unwrap(), level);
        }
        assert!(PermissionLevel::parse("write").is_err());

        let json = serde_json::to_string(&PermissionLevel::ReadWrite).unwrap();
        assert_eq!(json, "\"read-write\"");
    }

    #[test]
    fn test_minimum_filter_matches_grant_semantics() {
        use PermissionLevel::*;
        assert!(!None.meets_minimum(Option::None));
        assert!(Read.meets_minimum(Option::None));
        assert!(Read.meets_minimum(Some(Read)));
        assert!(!Read.meets_minimum(Some(ReadWrite)));
        assert!(ReadWrite.meets_minimum(Some(Read)));
        assert!(ReadWrite.meets_minimum(Some(ReadWrite)));
    }
}
