//! Wire format of the command channel: one JSON object per line in each direction.

use serde::{Deserialize, Serialize};

use super::storage::entities::BackupData;

/// A client request, tagged by its `action` name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    GetState,
    Start,
    Stop,
    Reset,
    Backup,
    #[serde(rename_all = "camelCase")]
    SetElapsed {
        elapsed_ms: u64,
    },
}

/// Reply to every request that does not return data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BackupData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
