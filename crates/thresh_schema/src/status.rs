//! Canonical status enums.
//!
//! Every status persisted by thresh is one of these closed enums, stored as
//! TEXT in its canonical `as_str` form. Legacy free-form spellings
//! ("auto-selected", "cleaning-failed") are accepted on parse only, as
//! migration aliases - they are never written back.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseEnumError;

/// Lifecycle status of a duplicate group.
/// This is the CANONICAL definition - use this everywhere for group status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupStatus {
    /// Group exists but no original has been chosen
    #[default]
    Pending,
    /// Automated scoring or a strategy proposed an original
    AutoSelected,
    /// A human (or human-equivalent bulk rule) confirmed the original
    Validated,
    /// A cleaner job is archiving and deleting the non-original files
    Cleaning,
    /// The last cleaner job finished with at least one failed file
    CleaningFailed,
    /// All non-original files archived and deleted
    Cleaned,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Pending => "PENDING",
            GroupStatus::AutoSelected => "AUTO_SELECTED",
            GroupStatus::Validated => "VALIDATED",
            GroupStatus::Cleaning => "CLEANING",
            GroupStatus::CleaningFailed => "CLEANING_FAILED",
            GroupStatus::Cleaned => "CLEANED",
        }
    }

    /// States an automated recompute may touch. Everything else carries a
    /// human decision (or in-flight/terminal cleanup) and is off limits.
    pub fn is_recomputable(&self) -> bool {
        matches!(self, GroupStatus::Pending | GroupStatus::AutoSelected)
    }

    /// States from which a cleaner job may be created.
    pub fn is_cleanable(&self) -> bool {
        matches!(self, GroupStatus::Validated | GroupStatus::CleaningFailed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GroupStatus::Cleaned)
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GroupStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "PENDING" => Ok(GroupStatus::Pending),
            "AUTO_SELECTED" | "AUTOSELECTED" => Ok(GroupStatus::AutoSelected),
            "VALIDATED" => Ok(GroupStatus::Validated),
            "CLEANING" => Ok(GroupStatus::Cleaning),
            "CLEANING_FAILED" => Ok(GroupStatus::CleaningFailed),
            "CLEANED" => Ok(GroupStatus::Cleaned),
            _ => Err(ParseEnumError::new("group status", s)),
        }
    }
}

/// How the currently-kept file of a group was chosen. Drives where an undo
/// lands: automated sources revert to AutoSelected, human sources to Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionSource {
    /// Preference scoring (RecalculateOriginals)
    Score,
    /// An AutoSelect strategy
    Strategy,
    /// Explicit single-group human selection
    Manual,
    /// Directory pattern rule
    Pattern,
    /// Bulk keep/remove override
    Bulk,
}

impl SelectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionSource::Score => "SCORE",
            SelectionSource::Strategy => "STRATEGY",
            SelectionSource::Manual => "MANUAL",
            SelectionSource::Pattern => "PATTERN",
            SelectionSource::Bulk => "BULK",
        }
    }

    /// Automated sources may be overwritten by recompute; human sources not.
    pub fn is_automated(&self) -> bool {
        matches!(self, SelectionSource::Score | SelectionSource::Strategy)
    }
}

impl fmt::Display for SelectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SelectionSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SCORE" => Ok(SelectionSource::Score),
            "STRATEGY" => Ok(SelectionSource::Strategy),
            "MANUAL" => Ok(SelectionSource::Manual),
            "PATTERN" => Ok(SelectionSource::Pattern),
            "BULK" => Ok(SelectionSource::Bulk),
            _ => Err(ParseEnumError::new("selection source", s)),
        }
    }
}

/// Lifecycle status of a cleaner job. The job row doubles as the worker
/// lease: only a Pending job can be claimed, and the claim flips it to
/// Processing atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job created, tasks enumerated, no worker has claimed it
    #[default]
    Pending,
    /// A worker holds the lease and is processing tasks
    Processing,
    /// All tasks terminal, zero failures
    Completed,
    /// All tasks terminal, at least one failure
    CompletedWithErrors,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::CompletedWithErrors)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" | "RUNNING" => Ok(JobStatus::Processing),
            "COMPLETED" | "COMPLETE" => Ok(JobStatus::Completed),
            "COMPLETED_WITH_ERRORS" => Ok(JobStatus::CompletedWithErrors),
            _ => Err(ParseEnumError::new("job status", s)),
        }
    }
}

/// Status of a single per-file task inside a cleaner job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    /// Archive confirmed, source deleted (or, in a dry run, both verified
    /// possible)
    Succeeded,
    /// Verification or I/O failure, recorded on the task and the file
    Failed,
    /// Task became moot: file already archived and deleted, or it became the
    /// kept original before the task ran
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Skipped => "SKIPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "SUCCEEDED" | "SUCCESS" => Ok(TaskStatus::Succeeded),
            "FAILED" => Ok(TaskStatus::Failed),
            "SKIPPED" => Ok(TaskStatus::Skipped),
            _ => Err(ParseEnumError::new("task status", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_status_round_trip() {
        for status in [
            GroupStatus::Pending,
            GroupStatus::AutoSelected,
            GroupStatus::Validated,
            GroupStatus::Cleaning,
            GroupStatus::CleaningFailed,
            GroupStatus::Cleaned,
        ] {
            assert_eq!(status.as_str().parse::<GroupStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_group_status_legacy_aliases() {
        assert_eq!(
            "auto-selected".parse::<GroupStatus>().unwrap(),
            GroupStatus::AutoSelected
        );
        assert_eq!(
            "cleaning-failed".parse::<GroupStatus>().unwrap(),
            GroupStatus::CleaningFailed
        );
        assert_eq!("pending".parse::<GroupStatus>().unwrap(), GroupStatus::Pending);
    }

    #[test]
    fn test_group_status_serde_matches_as_str() {
        assert_eq!(
            serde_json::to_string(&GroupStatus::AutoSelected).unwrap(),
            format!("\"{}\"", GroupStatus::AutoSelected.as_str())
        );
        assert_eq!(
            serde_json::to_string(&GroupStatus::CleaningFailed).unwrap(),
            format!("\"{}\"", GroupStatus::CleaningFailed.as_str())
        );
    }

    #[test]
    fn test_group_status_gates() {
        assert!(GroupStatus::Pending.is_recomputable());
        assert!(GroupStatus::AutoSelected.is_recomputable());
        assert!(!GroupStatus::Validated.is_recomputable());
        assert!(!GroupStatus::Cleaned.is_recomputable());
        assert!(GroupStatus::Validated.is_cleanable());
        assert!(GroupStatus::CleaningFailed.is_cleanable());
        assert!(!GroupStatus::Cleaning.is_cleanable());
    }

    #[test]
    fn test_selection_source_automation() {
        assert!(SelectionSource::Score.is_automated());
        assert!(SelectionSource::Strategy.is_automated());
        assert!(!SelectionSource::Manual.is_automated());
        assert!(!SelectionSource::Pattern.is_automated());
        assert!(!SelectionSource::Bulk.is_automated());
    }

    #[test]
    fn test_task_status_parse() {
        assert_eq!("succeeded".parse::<TaskStatus>().unwrap(), TaskStatus::Succeeded);
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::CompletedWithErrors.is_terminal());
    }
}
