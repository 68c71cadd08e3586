//! The work a scheduler drives.

use async_trait::async_trait;
use keel_workflow::{PeriodicSummary, ResumeSummary, WorkflowError, WorkflowService};
use rootcause::prelude::Report;

/// Time-driven engine entry points.
#[async_trait]
pub trait ScheduledWork: Send + Sync {
    /// Resumes continuations whose time has come.
    async fn run_scheduled_actions(&self) -> Result<ResumeSummary, Report<WorkflowError>>;

    /// Runs periodic workflows for the current period.
    async fn run_periodic_workflows(&self) -> Result<PeriodicSummary, Report<WorkflowError>>;
}

#[async_trait]
impl ScheduledWork for WorkflowService {
    async fn run_scheduled_actions(&self) -> Result<ResumeSummary, Report<WorkflowError>> {
        WorkflowService::run_scheduled_actions(self).await
    }

    async fn run_periodic_workflows(&self) -> Result<PeriodicSummary, Report<WorkflowError>> {
        WorkflowService::run_periodic_workflows(self).await
    }
}
