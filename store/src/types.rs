//! Row types shared across the store modules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stream_chunk::{MessageChunk, Usage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ConversationStatus::Active),
            "archived" => Some(ConversationStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub workspace_id: Option<String>,
    pub asset_id: Option<String>,
    /// Compatibility passthrough for legacy terminal-asset conversations.
    pub asset_session_id: Option<String>,
    pub status: ConversationStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            "tool" => Some(MessageRole::Tool),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Streaming,
    Completed,
    Error,
    Cancelled,
    Interrupted,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Streaming => "streaming",
            MessageStatus::Completed => "completed",
            MessageStatus::Error => "error",
            MessageStatus::Cancelled => "cancelled",
            MessageStatus::Interrupted => "interrupted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MessageStatus::Pending),
            "streaming" => Some(MessageStatus::Streaming),
            "completed" => Some(MessageStatus::Completed),
            "error" => Some(MessageStatus::Error),
            "cancelled" => Some(MessageStatus::Cancelled),
            "interrupted" => Some(MessageStatus::Interrupted),
            _ => None,
        }
    }

    /// Terminal states never transition again (except the startup sweep's
    /// streaming → interrupted flip).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Completed
                | MessageStatus::Error
                | MessageStatus::Cancelled
                | MessageStatus::Interrupted
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub parent_id: Option<String>,
    pub source_id: Option<String>,
    pub status: MessageStatus,
    pub finish_reason: Option<String>,
    /// Plain-text content view, computed on finalize.
    pub content: String,
    pub chunks: Vec<MessageChunk>,
    pub usage: Option<Usage>,
    pub created_at_ms: i64,
}

/// Where a workspace's tools take effect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeDescriptor {
    LocalHost,
    ContainerLocal,
    ContainerRemote { asset_id: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub runtime: RuntimeDescriptor,
    /// Current container id, persisted by runtime-event observers.
    pub container_id: Option<String>,
    pub description: Option<String>,
    pub created_at_ms: i64,
}

/// Per-workspace tool configuration row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkspaceTool {
    pub tool_id: String,
    pub enabled: bool,
    pub safe_mode: bool,
    pub options: Value,
    pub position: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    FolderGroup,
    LocalTerminal,
    SshHost,
    DockerHost,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::FolderGroup => "folder_group",
            AssetKind::LocalTerminal => "local_terminal",
            AssetKind::SshHost => "ssh_host",
            AssetKind::DockerHost => "docker_host",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "folder_group" => Some(AssetKind::FolderGroup),
            "local_terminal" => Some(AssetKind::LocalTerminal),
            "ssh_host" => Some(AssetKind::SshHost),
            "docker_host" => Some(AssetKind::DockerHost),
            _ => None,
        }
    }
}

/// A named connection endpoint. Siblings are a doubly-linked list via
/// `prev_id`/`next_id` so reordering never renumbers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub kind: AssetKind,
    /// Typed configuration (credentials, jump hosts, forwards) as JSON.
    pub config: Value,
    pub prev_id: Option<String>,
    pub next_id: Option<String>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrowserInstance {
    pub id: String,
    pub workspace_id: String,
    pub container_id: Option<String>,
    pub status: String,
    pub created_at_ms: i64,
}

/// Messages replaced by a synthetic summary, retained for UI reveal. The
/// summary text lives here; context composition substitutes it for the
/// covered messages, so the message tree itself is never rewritten.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompressionSnapshot {
    pub id: String,
    pub conversation_id: String,
    pub summary: String,
    pub messages: Vec<Message>,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryNote {
    pub key: String,
    pub value: String,
    pub updated_at_ms: i64,
}
