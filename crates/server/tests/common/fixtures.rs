//! Users, storages and grants shared by the service tests.
//!
//! | user  | storage 1                      | storage 2 (inactive) |
//! |-------|--------------------------------|----------------------|
//! | alice | read, read-write on "shared"   | -                    |
//! | bob   | read-write, none on "private"  | -                    |
//! | carol | override only on "shared"      | -                    |
//! | root  | admin                          | admin                |

use stowage_core::config::{GrantConfig, SeedConfig};
use stowage_core::{ConnectionParams, PermissionLevel, StorageConfigRecord, StorageId, User, UserId};

#[allow(dead_code)]
pub const PRIMARY: StorageId = StorageId(1);
#[allow(dead_code)]
pub const RETIRED: StorageId = StorageId(2);

#[allow(dead_code)]
pub fn alice() -> User {
    User::new(1, "alice")
}

#[allow(dead_code)]
pub fn bob() -> User {
    User::new(2, "bob")
}

#[allow(dead_code)]
pub fn carol() -> User {
    User::new(3, "carol")
}

#[allow(dead_code)]
pub fn root() -> User {
    User::admin(4, "root")
}

#[allow(dead_code)]
pub fn primary_params() -> ConnectionParams {
    ConnectionParams::new(Some("https://hel1.your-objectstorage.com".to_string()))
        .with_credentials("AKIDPRIMARY", "primary-secret")
        .with_region("eu-central")
}

fn grant(user: UserId, storage: StorageId, bucket: Option<&str>, level: PermissionLevel) -> GrantConfig {
    GrantConfig {
        user_id: user,
        storage_id: storage,
        bucket: bucket.map(str::to_string),
        level,
    }
}

#[allow(dead_code)]
pub fn seed() -> SeedConfig {
    let mut retired = StorageConfigRecord::new(
        RETIRED.0,
        "retired",
        ConnectionParams::new(Some("https://old.example.com".to_string())),
    );
    retired.is_active = false;

    SeedConfig {
        users: vec![alice(), bob(), carol(), root()],
        storages: vec![
            StorageConfigRecord::new(PRIMARY.0, "primary", primary_params()),
            retired,
        ],
        grants: vec![
            grant(alice().id, PRIMARY, None, PermissionLevel::Read),
            grant(alice().id, PRIMARY, Some("shared"), PermissionLevel::ReadWrite),
            grant(bob().id, PRIMARY, None, PermissionLevel::ReadWrite),
            grant(bob().id, PRIMARY, Some("private"), PermissionLevel::None),
            grant(carol().id, PRIMARY, Some("shared"), PermissionLevel::ReadWrite),
        ],
    }
}
