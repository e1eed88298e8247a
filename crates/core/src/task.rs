//! Task records tracked while bulk operations run out-of-band.

use crate::permission::{StorageId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque identifier for a task.
///
/// Generated ids are UUIDv4 strings, but any non-empty string handed out by
/// a caller is accepted so records created elsewhere can be looked up.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidTaskId("task id is empty".to_string()));
        }
        if trimmed.contains(char::is_whitespace) {
            return Err(crate::Error::InvalidTaskId(format!(
                "task id contains whitespace: {trimmed:?}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a task.
///
/// `Pending -> Running -> {Completed | Failed | Cancelled}`. Nothing leaves a
/// terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(crate::Error::InvalidTaskStatus(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the caller presents a task: as a tracked background job or as an
/// inline spinner attached to the view that started it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "BACKGROUND")]
    Background,
    #[serde(rename = "INLINE")]
    Inline,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "BACKGROUND",
            Self::Inline => "INLINE",
        }
    }
}

/// The bulk operation a task performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    DeleteBucket,
    DeletePrefix,
    BulkDelete,
    CalculateSize,
}

impl TaskAction {
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "delete_bucket" => Ok(Self::DeleteBucket),
            "delete_prefix" => Ok(Self::DeletePrefix),
            "bulk_delete" => Ok(Self::BulkDelete),
            "calculate_size" => Ok(Self::CalculateSize),
            _ => Err(crate::Error::InvalidTaskAction(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeleteBucket => "delete_bucket",
            Self::DeletePrefix => "delete_prefix",
            Self::BulkDelete => "bulk_delete",
            Self::CalculateSize => "calculate_size",
        }
    }

    /// Size calculation is shown inline; every destructive job runs as a
    /// background task.
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::CalculateSize => TaskType::Inline,
            _ => TaskType::Background,
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context captured when a task is created. Stored in the record's metadata
/// map and never changed afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    pub action: TaskAction,
    pub user_id: UserId,
    #[serde(rename = "storage_config_id")]
    pub storage_id: StorageId,
    pub bucket_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_count: Option<usize>,
}

impl TaskContext {
    pub fn new(
        action: TaskAction,
        user_id: UserId,
        storage_id: StorageId,
        bucket_name: impl Into<String>,
    ) -> Self {
        Self {
            action,
            user_id,
            storage_id,
            bucket_name: bucket_name.into(),
            prefix: None,
            object_count: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_object_count(mut self, count: usize) -> Self {
        self.object_count = Some(count);
        self
    }

    /// Flatten into the metadata map stored on the record.
    pub fn into_metadata(self) -> crate::Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(crate::Error::InvalidTaskAction(format!(
                "task context serialized to a non-object: {other}"
            ))),
        }
    }
}

/// Short error description stored on a failed record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub message: String,
    /// Classification such as `transport` or `partial_delete`.
    pub kind: String,
    #[serde(default)]
    pub details: Value,
}

impl TaskFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: kind.into(),
            details: Value::Object(Map::new()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// The progress record persisted under `task_progress:<task_id>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Percentage in `0..=100`.
    pub progress: u8,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Present only once the task completed.
    #[serde(default)]
    pub result: Option<Value>,
    /// Present only once the task failed.
    #[serde(default)]
    pub error: Option<TaskFailure>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl TaskRecord {
    /// Build a fresh `Pending` record.
    pub fn new(task_id: TaskId, task_type: TaskType, metadata: Map<String, Value>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            task_id,
            task_type,
            status: TaskStatus::Pending,
            progress: 0,
            current_step: None,
            metadata,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// The user that started the task, if recorded.
    pub fn owner(&self) -> Option<UserId> {
        self.metadata
            .get("user_id")
            .and_then(Value::as_i64)
            .map(UserId)
    }

    pub fn action(&self) -> Option<TaskAction> {
        self.metadata
            .get("action")
            .and_then(Value::as_str)
            .and_then(|s| TaskAction::parse(s).ok())
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_task_id_parse_rejects_blank() {
        assert!(TaskId::parse("   ").is_err());
        assert!(TaskId::parse("a b").is_err());
        assert_eq!(TaskId::parse(" abc ").unwrap().as_str(), "abc");
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn test_context_flattens_into_metadata() {
        let metadata = TaskContext::new(
            TaskAction::DeletePrefix,
            UserId(7),
            StorageId(3),
            "photos",
        )
        .with_prefix("2024/")
        .into_metadata()
        .unwrap();

        assert_eq!(metadata.get("action"), Some(&json!("delete_prefix")));
        assert_eq!(metadata.get("user_id"), Some(&json!(7)));
        assert_eq!(metadata.get("storage_config_id"), Some(&json!(3)));
        assert_eq!(metadata.get("prefix"), Some(&json!("2024/")));
        assert!(!metadata.contains_key("object_count"));

        let record = TaskRecord::new(TaskId::new(), TaskType::Background, metadata);
        assert_eq!(record.owner(), Some(UserId(7)));
        assert_eq!(record.action(), Some(TaskAction::DeletePrefix));
    }

    #[test]
    fn test_record_wire_format() {
        let record = TaskRecord::new(
            TaskId::parse("t-1").unwrap(),
            TaskType::Inline,
            Map::new(),
        );
        let value: Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(value["task_id"], "t-1");
        assert_eq!(value["task_type"], "INLINE");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["progress"], 0);

        let parsed = TaskRecord::from_json(&record.to_json().unwrap()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_calculate_size_is_inline() {
        assert_eq!(TaskAction::CalculateSize.task_type(), TaskType::Inline);
        assert_eq!(TaskAction::DeleteBucket.task_type(), TaskType::Background);
        assert_eq!(
            TaskAction::parse("bulk_delete").unwrap(),
            TaskAction::BulkDelete
        );
    }
}
