//! Task complexity analysis for foreman.
//!
//! Derives type tags and a size class from a task description. The keyword
//! implementation is deliberately simple (case-insensitive substring tests
//! against per-type keyword sets) and deterministic, so it is independently
//! testable. It sits behind the [`ComplexityAnalyzer`] trait so a stronger
//! classifier can be substituted without touching the state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of task type tags.
///
/// Agents declare capabilities as a set of these tags and the scorer matches
/// them against the tags derived from a task description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Implementation,
    Research,
    Testing,
    Documentation,
    Refactor,
    Deployment,
}

impl TaskType {
    /// All task types, in the order they are evaluated.
    pub const ALL: &'static [TaskType] = &[
        TaskType::Implementation,
        TaskType::Research,
        TaskType::Testing,
        TaskType::Documentation,
        TaskType::Refactor,
        TaskType::Deployment,
    ];

    /// Keywords whose presence in a description emits this tag.
    fn keywords(self) -> &'static [&'static str] {
        match self {
            TaskType::Implementation => &["implement", "build", "create", "add", "feature"],
            TaskType::Research => &["research", "investigate", "explore", "analyze", "compare"],
            TaskType::Testing => &["test", "verify", "validate", "coverage", "regression"],
            TaskType::Documentation => &["document", "docs", "readme", "guide", "changelog"],
            TaskType::Refactor => &["refactor", "restructure", "cleanup", "simplify", "rename"],
            TaskType::Deployment => &["deploy", "release", "publish", "rollout", "ship"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Implementation => "implementation",
            TaskType::Research => "research",
            TaskType::Testing => "testing",
            TaskType::Documentation => "documentation",
            TaskType::Refactor => "refactor",
            TaskType::Deployment => "deployment",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "implementation" => Ok(TaskType::Implementation),
            "research" => Ok(TaskType::Research),
            "testing" => Ok(TaskType::Testing),
            "documentation" => Ok(TaskType::Documentation),
            "refactor" => Ok(TaskType::Refactor),
            "deployment" => Ok(TaskType::Deployment),
            other => Err(format!("unknown task type: '{}'", other)),
        }
    }
}

/// Size class derived from description length and tag count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Low,
    Medium,
    High,
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeClass::Low => write!(f, "low"),
            SizeClass::Medium => write!(f, "medium"),
            SizeClass::High => write!(f, "high"),
        }
    }
}

/// Result of analyzing a task description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProfile {
    /// Type tags, in [`TaskType::ALL`] order; each tag appears at most once.
    pub tags: Vec<TaskType>,
    /// Derived size class.
    pub size: SizeClass,
}

/// Pluggable classifier seam.
///
/// Implementations must be pure: the same description always yields the
/// same profile.
pub trait ComplexityAnalyzer: Send + Sync {
    fn analyze(&self, description: &str) -> TaskProfile;
}

/// Description length above which a task is sized `high`.
const HIGH_LEN_THRESHOLD: usize = 200;

/// Description length below which a task is sized `low`.
const LOW_LEN_THRESHOLD: usize = 50;

/// Tag count above which a task is sized `high`.
const HIGH_TAG_THRESHOLD: usize = 2;

/// Default keyword-based analyzer.
#[derive(Debug, Default, Clone)]
pub struct KeywordAnalyzer;

impl ComplexityAnalyzer for KeywordAnalyzer {
    fn analyze(&self, description: &str) -> TaskProfile {
        let lowered = description.to_lowercase();

        let tags: Vec<TaskType> = TaskType::ALL
            .iter()
            .copied()
            .filter(|t| t.keywords().iter().any(|kw| lowered.contains(kw)))
            .collect();

        let size = if description.chars().count() > HIGH_LEN_THRESHOLD
            || tags.len() > HIGH_TAG_THRESHOLD
        {
            SizeClass::High
        } else if description.chars().count() < LOW_LEN_THRESHOLD {
            SizeClass::Low
        } else {
            SizeClass::Medium
        };

        TaskProfile { tags, size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(description: &str) -> TaskProfile {
        KeywordAnalyzer.analyze(description)
    }

    #[test]
    fn implementation_keyword_emits_tag() {
        let profile = analyze("implement the login flow");
        assert_eq!(profile.tags, vec![TaskType::Implementation]);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let profile = analyze("IMPLEMENT the login flow");
        assert_eq!(profile.tags, vec![TaskType::Implementation]);
    }

    #[test]
    fn tag_emitted_once_per_type() {
        // Multiple keywords for the same type still produce one tag.
        let profile = analyze("implement and build and create the thing");
        assert_eq!(profile.tags, vec![TaskType::Implementation]);
    }

    #[test]
    fn multiple_types_emit_multiple_tags() {
        let profile = analyze("research the approach, then test it");
        assert_eq!(profile.tags, vec![TaskType::Research, TaskType::Testing]);
    }

    #[test]
    fn no_keywords_emits_no_tags() {
        let profile = analyze("miscellaneous chores around the repo");
        assert!(profile.tags.is_empty());
    }

    #[test]
    fn short_description_is_low() {
        let profile = analyze("fix typo");
        assert_eq!(profile.size, SizeClass::Low);
    }

    #[test]
    fn mid_length_description_is_medium() {
        let profile = analyze("investigate why the nightly job has been failing on startup");
        assert_eq!(profile.size, SizeClass::Medium);
    }

    #[test]
    fn long_description_is_high() {
        let long = "x".repeat(201);
        let profile = analyze(&long);
        assert_eq!(profile.size, SizeClass::High);
    }

    #[test]
    fn many_tags_force_high_even_when_short_text() {
        // Three tags in under 50 characters: tag count wins over length.
        let profile = analyze("research, implement, test auth");
        assert_eq!(
            profile.tags,
            vec![TaskType::Implementation, TaskType::Research, TaskType::Testing]
        );
        assert_eq!(profile.size, SizeClass::High);
    }

    #[test]
    fn analysis_is_deterministic() {
        let description = "implement and document the retry policy for the ingestion pipeline";
        assert_eq!(analyze(description), analyze(description));
    }

    #[test]
    fn task_type_round_trips_through_str() {
        for t in TaskType::ALL {
            assert_eq!(t.as_str().parse::<TaskType>().unwrap(), *t);
        }
        assert!("unknown".parse::<TaskType>().is_err());
    }

    #[test]
    fn task_type_serializes_snake_case() {
        let json = serde_json::to_string(&TaskType::Implementation).unwrap();
        assert_eq!(json, "\"implementation\"");
    }
}
