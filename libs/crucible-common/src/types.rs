use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Strongly-typed language enum
/// Adding a language here is a data change: extend the enum and the
/// registry table in `languages.rs`, nothing else hard-codes the set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python3,
    Javascript,
    Java,
    Cpp,
    C,
}

impl Language {
    /// Returns all language variants
    /// This is the single source of truth for available languages
    pub fn all_variants() -> &'static [Language] {
        &[
            Language::Python3,
            Language::Javascript,
            Language::Java,
            Language::Cpp,
            Language::C,
        ]
    }

    /// Parse a language from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Language> {
        match s.to_lowercase().as_str() {
            "python3" => Some(Language::Python3),
            "javascript" => Some(Language::Javascript),
            "java" => Some(Language::Java),
            "cpp" => Some(Language::Cpp),
            "c" => Some(Language::C),
            _ => None,
        }
    }

    /// Stable lowercase identifier, used as the wire and database form
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python3 => "python3",
            Language::Javascript => "javascript",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::C => "c",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job State Machine
/// Legal transitions: pending → running → one terminal state.
/// Terminal states never transition again; the store enforces this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    CompileError,
    RuntimeError,
    Timeout,
    InternalError,
}

impl JobStatus {
    pub fn from_str(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "compile_error" => Some(JobStatus::CompileError),
            "runtime_error" => Some(JobStatus::RuntimeError),
            "timeout" => Some(JobStatus::Timeout),
            "internal_error" => Some(JobStatus::InternalError),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::CompileError => "compile_error",
            JobStatus::RuntimeError => "runtime_error",
            JobStatus::Timeout => "timeout",
            JobStatus::InternalError => "internal_error",
        }
    }

    /// Terminal states carry results and never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job Input (Immutable)
/// What the Submission API hands to the store; everything else about the
/// record is filled in by lifecycle transitions.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub language: Language,
    pub source_code: String,
    pub stdin: String,
    pub timeout_ms: Option<i64>,
    pub memory_limit_mib: Option<i64>,
    pub cpu_quota: Option<f64>,
}

/// One row of the `jobs` table.
///
/// Input fields are write-once at creation. Result fields are write-once at
/// the terminal transition and stay NULL while the job is pending/running,
/// so serializing a non-terminal record naturally hides them.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub language: Language,
    pub source_code: String,
    pub stdin: String,
    pub timeout_ms: Option<i64>,
    pub memory_limit_mib: Option<i64>,
    pub cpu_quota: Option<f64>,
    pub status: JobStatus,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i64>,
    pub execution_time_ms: Option<i64>,
    pub memory_usage_kib: Option<i64>,
    pub compile_output: Option<String>,
    pub error_message: Option<String>,
}

/// Result payload for the terminal transition
/// Written exactly once by the worker that holds the claim
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i64>,
    pub execution_time_ms: Option<i64>,
    pub memory_usage_kib: Option<i64>,
    pub compile_output: Option<String>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_serialization() {
        let lang = Language::Python3;
        let json = serde_json::to_string(&lang).unwrap();
        assert_eq!(json, "\"python3\"");

        let deserialized: Language = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, Language::Python3);
    }

    #[test]
    fn test_language_from_str() {
        assert_eq!(Language::from_str("python3"), Some(Language::Python3));
        assert_eq!(Language::from_str("Python3"), Some(Language::Python3));
        assert_eq!(Language::from_str("CPP"), Some(Language::Cpp));
        assert_eq!(Language::from_str("javascript"), Some(Language::Javascript));
        assert_eq!(Language::from_str("c"), Some(Language::C));

        assert_eq!(Language::from_str("ruby"), None);
        assert_eq!(Language::from_str(""), None);
    }

    #[test]
    fn test_language_round_trip_all_variants() {
        for lang in Language::all_variants() {
            assert_eq!(Language::from_str(lang.as_str()), Some(*lang));
        }
    }

    #[test]
    fn test_job_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::CompileError).unwrap(),
            "\"compile_error\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Pending).unwrap(),
            "\"pending\""
        );

        let status: JobStatus = serde_json::from_str("\"internal_error\"").unwrap();
        assert_eq!(status, JobStatus::InternalError);
    }

    #[test]
    fn test_job_status_db_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::CompileError,
            JobStatus::RuntimeError,
            JobStatus::Timeout,
            JobStatus::InternalError,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::from_str("failed"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::CompileError.is_terminal());
        assert!(JobStatus::RuntimeError.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
        assert!(JobStatus::InternalError.is_terminal());
    }

    #[test]
    fn test_non_terminal_record_serializes_null_results() {
        let record = JobRecord {
            id: Uuid::new_v4(),
            language: Language::Python3,
            source_code: "print(1)".to_string(),
            stdin: String::new(),
            timeout_ms: None,
            memory_limit_mib: None,
            cpu_quota: None,
            status: JobStatus::Pending,
            worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            stdout: None,
            stderr: None,
            exit_code: None,
            execution_time_ms: None,
            memory_usage_kib: None,
            compile_output: None,
            error_message: None,
        };

        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json["stdout"].is_null());
        assert!(json["exit_code"].is_null());
        assert!(json["completed_at"].is_null());
    }
}
