//! Row models and operation payload types.
//!
//! Rows map 1:1 to the SQLite tables. Files reference their group through a
//! plain `group_id` - there is no embedded back-reference in either
//! direction, the stores look members up by id.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::ParseEnumError;
use crate::status::{GroupStatus, JobStatus, SelectionSource, TaskStatus};

/// Current wall-clock time as an RFC 3339 string with fixed microsecond
/// precision, so TEXT comparison in SQL is chronological.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ============================================================================
// Rows
// ============================================================================

/// A set of files sharing one content hash.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DuplicateGroup {
    pub id: i64,
    pub content_hash: String,
    pub file_count: i64,
    pub total_size: i64,
    pub status: GroupStatus,
    /// The designated original. Always a live member file once set.
    pub kept_file_id: Option<i64>,
    pub selection_source: Option<SelectionSource>,
    pub validated_at: Option<String>,
    pub resolved_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A content-hashed file known to the engine. Created by ingestion, only
/// ever soft-deleted by the cleaner pipeline.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct IndexedFile {
    pub id: i64,
    pub group_id: Option<i64>,
    pub path: String,
    pub content_hash: String,
    pub size: i64,
    pub modified_at: Option<String>,
    pub file_created_at: Option<String>,
    pub category: FileCategory,
    pub is_deleted: bool,
    pub deleted_at: Option<String>,
    /// Archive key. Set before the source file is ever deleted.
    pub archive_path: Option<String>,
    /// Set by the retention sweep once the archived bytes are purged.
    pub archive_purged_at: Option<String>,
    pub last_error: Option<String>,
    pub retry_count: i64,
    pub indexed_at: String,
}

impl IndexedFile {
    /// Parent directory of the file's path, as stored (no trailing slash).
    pub fn parent_dir(&self) -> String {
        Path::new(&self.path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Ordered path-prefix scoring rule. Lower `sort_order` evaluates first;
/// the first matching prefix wins.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SelectionPreference {
    #[serde(default)]
    pub id: i64,
    pub path_prefix: String,
    /// 0-100, higher preferred.
    pub priority: i64,
    #[serde(default)]
    pub sort_order: i64,
}

/// A batch of per-file archive-then-delete tasks. Immutable history once
/// terminal.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CleanerJob {
    pub id: i64,
    pub status: JobStatus,
    pub dry_run: bool,
    /// Human-readable description of the selector the job was created from.
    pub selector: String,
    pub total_files: i64,
    pub processed_files: i64,
    pub succeeded_files: i64,
    pub failed_files: i64,
    pub skipped_files: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// One deletion task inside a cleaner job.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CleanerJobFile {
    pub id: i64,
    pub job_id: i64,
    pub file_id: i64,
    pub group_id: i64,
    pub status: TaskStatus,
    pub archive_path: Option<String>,
    pub error: Option<String>,
    pub finished_at: Option<String>,
}

// ============================================================================
// Enums used by operations
// ============================================================================

/// Coarse file category derived from the path extension, used by cleaner
/// job selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileCategory {
    Image,
    Video,
    Audio,
    Document,
    Archive,
    #[default]
    Other,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Image => "IMAGE",
            FileCategory::Video => "VIDEO",
            FileCategory::Audio => "AUDIO",
            FileCategory::Document => "DOCUMENT",
            FileCategory::Archive => "ARCHIVE",
            FileCategory::Other => "OTHER",
        }
    }

    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "tiff" | "heic" | "raw" | "cr2"
            | "nef" => FileCategory::Image,
            "mp4" | "mov" | "avi" | "mkv" | "wmv" | "m4v" | "webm" => FileCategory::Video,
            "mp3" | "flac" | "wav" | "aac" | "ogg" | "m4a" => FileCategory::Audio,
            "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "txt" | "md" => {
                FileCategory::Document
            }
            "zip" | "tar" | "gz" | "7z" | "rar" | "bz2" => FileCategory::Archive,
            _ => FileCategory::Other,
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileCategory {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "IMAGE" => Ok(FileCategory::Image),
            "VIDEO" => Ok(FileCategory::Video),
            "AUDIO" => Ok(FileCategory::Audio),
            "DOCUMENT" => Ok(FileCategory::Document),
            "ARCHIVE" => Ok(FileCategory::Archive),
            "OTHER" => Ok(FileCategory::Other),
            _ => Err(ParseEnumError::new("file category", s)),
        }
    }
}

/// AutoSelect / pattern tie-breaker strategy. Every strategy falls back to
/// ascending file id, so selection is a total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectStrategy {
    EarliestDate,
    ShortestPath,
    LargestFile,
    FirstIndexed,
}

impl SelectStrategy {
    pub const ALL: &'static [SelectStrategy] = &[
        SelectStrategy::EarliestDate,
        SelectStrategy::ShortestPath,
        SelectStrategy::LargestFile,
        SelectStrategy::FirstIndexed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectStrategy::EarliestDate => "earliest_date",
            SelectStrategy::ShortestPath => "shortest_path",
            SelectStrategy::LargestFile => "largest_file",
            SelectStrategy::FirstIndexed => "first_indexed",
        }
    }
}

impl fmt::Display for SelectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SelectStrategy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "earliest_date" => Ok(SelectStrategy::EarliestDate),
            "shortest_path" => Ok(SelectStrategy::ShortestPath),
            "largest_file" => Ok(SelectStrategy::LargestFile),
            "first_indexed" => Ok(SelectStrategy::FirstIndexed),
            _ => Err(ParseEnumError::new("select strategy", s)),
        }
    }
}

/// Which groups a recompute or bulk override may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverrideScope {
    /// Groups without a confirmed decision: Pending and AutoSelected.
    #[default]
    Pending,
    /// Additionally re-target groups already Validated (bulk override only;
    /// recompute never touches Validated regardless of scope).
    All,
}

impl OverrideScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideScope::Pending => "pending",
            OverrideScope::All => "all",
        }
    }
}

impl fmt::Display for OverrideScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OverrideScope {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OverrideScope::Pending),
            "all" => Ok(OverrideScope::All),
            _ => Err(ParseEnumError::new("override scope", s)),
        }
    }
}

/// Identifies the groups a cleaner job targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum JobSelector {
    /// Explicit group ids. Any ineligible id rejects the whole request.
    Groups { ids: Vec<i64> },
    /// All eligible groups containing a file of this category.
    Category { category: FileCategory },
    /// All eligible groups containing a file under this directory prefix.
    Directory { prefix: String },
}

impl JobSelector {
    /// Short description stored on the job row for display.
    pub fn describe(&self) -> String {
        match self {
            JobSelector::Groups { ids } => format!("groups: {:?}", ids),
            JobSelector::Category { category } => format!("category: {}", category),
            JobSelector::Directory { prefix } => format!("directory: {}", prefix),
        }
    }
}

// ============================================================================
// Operation payloads
// ============================================================================

/// One would-be assignment from a recompute preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedOriginal {
    pub group_id: i64,
    /// None when the group's top score is tied (conflict).
    pub file_id: Option<i64>,
    pub score: i64,
    pub conflict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalcOutcome {
    pub updated: u64,
    pub conflicts: u64,
    /// Present only for preview runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Vec<ProposedOriginal>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub group_id: i64,
    pub file_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternOutcome {
    pub matched: u64,
    pub groups: Vec<PatternMatch>,
    /// False for preview runs - nothing was persisted.
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkExample {
    pub group_id: i64,
    pub keep_path: String,
    pub remove_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkPreviewOutcome {
    pub match_count: u64,
    pub examples: Vec<BulkExample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkApplyOutcome {
    pub applied: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateOutcome {
    pub validated: u64,
    /// Groups still eligible for validation after this batch.
    pub remaining: u64,
}

/// Per-group result of an undo request. `error` is set for groups whose
/// status forbade the undo (already cleaning or cleaned).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoResult {
    pub group_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverted_to: Option<GroupStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Input record from the upstream scanner/hasher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRecord {
    pub path: String,
    pub content_hash: String,
    pub size: i64,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub files_added: u64,
    pub files_skipped: u64,
    pub groups_created: u64,
    /// Terminal-state groups that gained a member and reopened to Pending.
    pub groups_reopened: u64,
}

/// Aggregate counters of a cleaner job, recomputable from its tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCounts {
    pub job_id: i64,
    pub status: JobStatus,
    pub dry_run: bool,
    pub total_files: i64,
    pub processed_files: i64,
    pub succeeded_files: i64,
    pub failed_files: i64,
    pub skipped_files: i64,
}

impl From<&CleanerJob> for JobCounts {
    fn from(job: &CleanerJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            dry_run: job.dry_run,
            total_files: job.total_files,
            processed_files: job.processed_files,
            succeeded_files: job.succeeded_files,
            failed_files: job.failed_files,
            skipped_files: job.skipped_files,
        }
    }
}

/// Retention sweep statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepStats {
    pub scanned: u64,
    pub purged: u64,
    pub bytes_reclaimed: u64,
    pub errors: u64,
}

/// Status overview for operators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub groups_pending: i64,
    pub groups_auto_selected: i64,
    pub groups_validated: i64,
    pub groups_cleaning: i64,
    pub groups_cleaning_failed: i64,
    pub groups_cleaned: i64,
    pub total_files: i64,
    pub deleted_files: i64,
    /// Bytes held by live non-kept members of groups with a chosen original.
    pub reclaimable_bytes: i64,
}

/// Everything a selection UI needs to render its configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub preferences: Vec<SelectionPreference>,
    pub strategies: Vec<String>,
    pub scopes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ts_is_rfc3339_micros() {
        let ts = now_ts();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
        // Fixed precision keeps lexicographic order chronological.
        assert_eq!(ts.len(), "2026-01-01T00:00:00.000000Z".len());
    }

    #[test]
    fn test_file_category_from_path() {
        assert_eq!(FileCategory::from_path("/photos/a.JPG"), FileCategory::Image);
        assert_eq!(FileCategory::from_path("/v/clip.mkv"), FileCategory::Video);
        assert_eq!(FileCategory::from_path("/d/report.pdf"), FileCategory::Document);
        assert_eq!(FileCategory::from_path("/x/noext"), FileCategory::Other);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "earliest-date".parse::<SelectStrategy>().unwrap(),
            SelectStrategy::EarliestDate
        );
        assert_eq!(
            "largest_file".parse::<SelectStrategy>().unwrap(),
            SelectStrategy::LargestFile
        );
        assert!("newest".parse::<SelectStrategy>().is_err());
    }

    #[test]
    fn test_parent_dir() {
        let file = IndexedFile {
            id: 1,
            group_id: None,
            path: "/photos/2020/a.jpg".to_string(),
            content_hash: "h".to_string(),
            size: 1,
            modified_at: None,
            file_created_at: None,
            category: FileCategory::Image,
            is_deleted: false,
            deleted_at: None,
            archive_path: None,
            archive_purged_at: None,
            last_error: None,
            retry_count: 0,
            indexed_at: now_ts(),
        };
        assert_eq!(file.parent_dir(), "/photos/2020");
    }

    #[test]
    fn test_selector_describe() {
        let sel = JobSelector::Directory {
            prefix: "/public".to_string(),
        };
        assert_eq!(sel.describe(), "directory: /public");
        let json = serde_json::to_string(&sel).unwrap();
        assert!(json.contains("\"kind\":\"directory\""));
    }
}
