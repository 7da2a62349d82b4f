use serde::{Deserialize, Serialize};

/// Offered before a file's chunks; JSON payload of the `FILE_INFO` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
    #[serde(rename = "totalChunks")]
    pub total_chunks: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// JSON payload of the `QUEUE_INFO` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    #[serde(rename = "totalFiles")]
    pub total_files: u32,
    #[serde(rename = "currentIndex")]
    pub current_index: u32,
}
