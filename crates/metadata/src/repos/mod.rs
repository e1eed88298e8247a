//! Repository traits for metadata operations.

pub mod grants;
pub mod storage_configs;
pub mod users;

pub use grants::GrantRepo;
pub use storage_configs::StorageConfigRepo;
pub use users::UserRepo;
