use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BuildError;
use crate::models::ExecutionResult;
use crate::package::ToolConfigurationPackage;

/// Lifecycle status of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    PendingAnalysis,
    AnalysisFailed,
    GeneratingSamples,
    PendingUserFeedback,
    ProcessingFeedback,
    ReadyForScraping,
    Confirmed,
    ScrapingInProgress,
    Completed,
    PartialSuccess,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub const ALL: [BuildStatus; 12] = [
        BuildStatus::PendingAnalysis,
        BuildStatus::AnalysisFailed,
        BuildStatus::GeneratingSamples,
        BuildStatus::PendingUserFeedback,
        BuildStatus::ProcessingFeedback,
        BuildStatus::ReadyForScraping,
        BuildStatus::Confirmed,
        BuildStatus::ScrapingInProgress,
        BuildStatus::Completed,
        BuildStatus::PartialSuccess,
        BuildStatus::Failed,
        BuildStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::PendingAnalysis => "PENDING_ANALYSIS",
            BuildStatus::AnalysisFailed => "ANALYSIS_FAILED",
            BuildStatus::GeneratingSamples => "GENERATING_SAMPLES",
            BuildStatus::PendingUserFeedback => "PENDING_USER_FEEDBACK",
            BuildStatus::ProcessingFeedback => "PROCESSING_FEEDBACK",
            BuildStatus::ReadyForScraping => "READY_FOR_SCRAPING",
            BuildStatus::Confirmed => "CONFIRMED",
            BuildStatus::ScrapingInProgress => "SCRAPING_IN_PROGRESS",
            BuildStatus::Completed => "COMPLETED",
            BuildStatus::PartialSuccess => "PARTIAL_SUCCESS",
            BuildStatus::Failed => "FAILED",
            BuildStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::AnalysisFailed
                | BuildStatus::Completed
                | BuildStatus::PartialSuccess
                | BuildStatus::Failed
                | BuildStatus::Cancelled
        )
    }

    /// A build can be cancelled until scraping starts.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            BuildStatus::PendingAnalysis
                | BuildStatus::GeneratingSamples
                | BuildStatus::PendingUserFeedback
                | BuildStatus::ProcessingFeedback
                | BuildStatus::ReadyForScraping
                | BuildStatus::Confirmed
        )
    }

    /// Whether the lifecycle graph allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        use BuildStatus::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        if next == Cancelled {
            return self.is_cancellable();
        }
        matches!(
            (self, next),
            (PendingAnalysis, GeneratingSamples)
                | (PendingAnalysis, AnalysisFailed)
                | (GeneratingSamples, PendingUserFeedback)
                | (PendingUserFeedback, ProcessingFeedback)
                | (ProcessingFeedback, GeneratingSamples)
                | (ProcessingFeedback, ReadyForScraping)
                | (ReadyForScraping, ProcessingFeedback)
                | (ReadyForScraping, Confirmed)
                | (Confirmed, ScrapingInProgress)
                | (ScrapingInProgress, Completed)
                | (ScrapingInProgress, PartialSuccess)
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        BuildStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("Unknown build status: {}", s))
    }
}

/// What the user's feedback is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// The proposed extraction approach is wrong; re-derive and resample.
    Approach,
    /// The samples are close; tune the package and get ready to scrape.
    Samples,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Approach => "approach",
            FeedbackKind::Samples => "samples",
        }
    }
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approach" => Ok(FeedbackKind::Approach),
            "samples" | "sample" => Ok(FeedbackKind::Samples),
            _ => Err(format!("Unknown feedback kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFeedback {
    pub kind: FeedbackKind,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
}

impl UserFeedback {
    pub fn new(kind: FeedbackKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            submitted_at: Utc::now(),
        }
    }
}

/// A build: one user request tracked through the lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: Uuid,
    pub objective: String,
    pub target_urls: Vec<String>,
    pub status: BuildStatus,
    pub initial_package: Option<ToolConfigurationPackage>,
    pub final_package: Option<ToolConfigurationPackage>,
    pub sample_results: Option<ExecutionResult>,
    pub results: Option<ExecutionResult>,
    pub error: Option<BuildError>,
    pub user_feedback: Option<UserFeedback>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Build {
    /// The package execution should run: final if refined, initial otherwise.
    pub fn active_package(&self) -> Option<&ToolConfigurationPackage> {
        self.final_package.as_ref().or(self.initial_package.as_ref())
    }
}

/// Request to create a new build.
#[derive(Debug, Clone)]
pub struct CreateBuildRequest {
    pub objective: String,
    pub target_urls: Vec<String>,
}

impl CreateBuildRequest {
    pub fn new<I, S>(objective: impl Into<String>, target_urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            objective: objective.into(),
            target_urls: target_urls.into_iter().map(Into::into).collect(),
        }
    }

    pub fn into_build(self) -> Build {
        let now = Utc::now();
        Build {
            id: Uuid::new_v4(),
            objective: self.objective,
            target_urls: self.target_urls,
            status: BuildStatus::PendingAnalysis,
            initial_package: None,
            final_package: None,
            sample_results: None,
            results: None,
            error: None,
            user_feedback: None,
            created_at: now,
            updated_at: now,
        }
    }
}
