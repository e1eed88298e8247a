//! Core domain types and shared logic for the stowage engine.
//!
//! This crate defines the data model used by every other crate:
//! - Permission levels and the precedence rule between them
//! - Task records and their lifecycle states
//! - Storage configurations and connection parameters
//! - Application configuration

pub mod config;
pub mod error;
pub mod format;
pub mod permission;
pub mod storage_config;
pub mod task;

pub use error::{Error, Result};
pub use format::format_size;
pub use permission::{PermissionLevel, StorageId, User, UserId, resolve_level};
pub use storage_config::{ConnectionParams, DEFAULT_REGION, StorageConfigRecord};
pub use task::{
    TaskAction, TaskContext, TaskFailure, TaskId, TaskRecord, TaskStatus, TaskType,
};
