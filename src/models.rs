//! Core data types: [`Document`], [`CandidateChunk`], [`Chunk3D`], [`IngestTask`].
//!
//! Status/kind enums are stored as `text` columns and converted manually at
//! the persistence layer (see [`crate::persistence`]), matching how the
//! rest of the store's queries bind and read raw rows rather than relying
//! on derive-based row mapping for every column.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "Processing",
            DocumentStatus::Ready => "Ready",
            DocumentStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Processing" => Some(DocumentStatus::Processing),
            "Ready" => Some(DocumentStatus::Ready),
            "Failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single ingested source document. Owns its chunks exclusively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub original_gcs: String,
    pub gcs_generation: i64,
    pub processed_gcs: Option<String>,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A chunk's position in the 3D visualization cube, replaced wholesale by
/// each reducer run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Chunk3D {
    pub chunk_id: i64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    UrlProcessing,
    TextProcessing,
    FileProcessing,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::UrlProcessing => "url_processing",
            TaskKind::TextProcessing => "text_processing",
            TaskKind::FileProcessing => "file_processing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "url_processing" => Some(TaskKind::UrlProcessing),
            "text_processing" => Some(TaskKind::TextProcessing),
            "file_processing" => Some(TaskKind::FileProcessing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(TaskStatus::Queued),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

/// Standalone unit of work tracked by the task queue bridge; references no
/// other entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestTask {
    pub task_id: Uuid,
    pub task_type: TaskKind,
    pub status: TaskStatus,
    pub input_data: serde_json::Value,
    pub result_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of a single chunk/vector candidate surfaced by the retriever or
/// rank fuser, carrying enough of the owning document to build citations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateChunk {
    pub chunk_id: i64,
    pub doc_id: Uuid,
    pub doc_filename: String,
    pub chunk_index: i32,
    pub text: String,
    pub score: f64,
}

/// A distinct source document referenced by an assembled answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: Uuid,
    pub name: String,
    pub uri: String,
}
