//! The workflow engine.
//!
//! [`WorkflowService`] is called in three ways:
//!
//! 1. After an entity save or delete, [`run_workflows_on_event`] finds the
//!    workflows bound to the event, checks the singleton guard and the stored
//!    conditions, creates an instance and walks the action forest.
//! 2. On a scheduler poll, [`run_scheduled_actions`] resumes branches paused by
//!    a wait action, running the children of the paused node.
//! 3. On a slower scheduler tick, [`run_periodic_workflows`] runs time-based
//!    workflows against every matching entity once per period.
//!
//! A walk visits actions depth first in sibling order. An action that fails
//! or declines ends only its own branch. A wait ends its branch and persists a
//! continuation; a stop ends the whole walk and marks the instance stopped.
//! If the continuation or the stop cannot be persisted, that branch counts as
//! failed and the instance completes unless some other branch paused.
//! Paused state lives only in storage, so any process can resume it.
//!
//! [`run_workflows_on_event`]: WorkflowService::run_workflows_on_event
//! [`run_scheduled_actions`]: WorkflowService::run_scheduled_actions
//! [`run_periodic_workflows`]: WorkflowService::run_periodic_workflows

use crate::action::{ActionForest, ActionNode};
use crate::conditions::ConditionEvaluator;
use crate::definition::{EventKind, WorkflowDefinition};
use crate::error::WorkflowError;
use crate::executor::{ActionError, ActionExecutorRegistry, ActionOutcome};
use crate::instance::{InstanceStatus, ScheduledContinuation, WorkflowInstance};
use crate::mapper::{DataMapperError, WorkflowDataMapper};
use crate::matcher::WorkflowMatcher;
use crate::singleton::SingletonGuard;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use keel_core::{AccountId, ActionId, EntityId, WorkflowId, WorkflowInstanceId};
use keel_entity::{Actor, Entity, EntityError, EntityQuery, EntityStore, QueryIndex};
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// How deep `start_workflow` actions may nest before launches fail.
pub const DEFAULT_MAX_LAUNCH_DEPTH: usize = 5;

/// What happened during one walk over part of an action forest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkReport {
    /// Actions whose executor was invoked (or failed to resolve).
    pub executed: usize,
    /// Actions that returned an error.
    pub failed: usize,
    /// Failures that a retry could fix.
    pub transient_failures: usize,
    /// A wait action persisted a continuation.
    pub suspended: bool,
    /// A stop action ended the instance.
    pub stopped: bool,
}

impl WalkReport {
    fn record_failure(&mut self, error: &ActionError) {
        self.failed += 1;
        if error.is_transient() {
            self.transient_failures += 1;
        }
    }

    fn record_storage_failure(&mut self, error: &DataMapperError) {
        self.failed += 1;
        if error.is_transient() {
            self.transient_failures += 1;
        }
    }
}

/// Why a matched workflow did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// On update, no field used by the conditions changed.
    ConditionsUnchanged,
    /// A singleton workflow already has a running instance for the entity.
    SingletonRunning,
    /// The entity does not satisfy the stored conditions.
    ConditionsUnmet,
    /// A periodic workflow already ran for the entity in this period.
    AlreadyRanThisPeriod,
    /// A launched workflow is inactive.
    Inactive,
}

/// Result of trying to start one workflow against one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started {
        instance_id: WorkflowInstanceId,
        status: InstanceStatus,
        report: WalkReport,
    },
    Skipped(SkipReason),
}

/// Totals for one entity event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSummary {
    pub started: Vec<WorkflowInstanceId>,
    pub skipped: usize,
    pub failed: usize,
}

/// Totals for one pass over due continuations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeSummary {
    /// Children ran and the continuation was removed.
    pub resumed: usize,
    /// The continuation was removed without running anything.
    pub discarded: usize,
    /// The continuation was kept for the next poll.
    pub retained: usize,
}

/// Totals for one periodic pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodicSummary {
    pub instances_started: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone, Copy)]
enum Trigger<'a> {
    Event(EventKind),
    Periodic { period_key: &'a str },
    Launch,
}

enum Resumed {
    Ran,
    Discarded,
    Retained,
}

/// The workflow engine.
pub struct WorkflowService {
    mapper: Arc<dyn WorkflowDataMapper>,
    entities: Arc<dyn EntityStore>,
    index: Arc<dyn QueryIndex>,
    executors: ActionExecutorRegistry,
    matcher: WorkflowMatcher,
    conditions: ConditionEvaluator,
    singleton: SingletonGuard,
    max_launch_depth: usize,
}

impl WorkflowService {
    /// Creates the engine from its collaborators.
    #[must_use]
    pub fn new(
        mapper: Arc<dyn WorkflowDataMapper>,
        entities: Arc<dyn EntityStore>,
        index: Arc<dyn QueryIndex>,
        executors: ActionExecutorRegistry,
    ) -> Self {
        Self {
            matcher: WorkflowMatcher::new(mapper.clone()),
            conditions: ConditionEvaluator::new(index.clone()),
            singleton: SingletonGuard::new(mapper.clone()),
            mapper,
            entities,
            index,
            executors,
            max_launch_depth: DEFAULT_MAX_LAUNCH_DEPTH,
        }
    }

    #[must_use]
    pub fn with_max_launch_depth(mut self, depth: usize) -> Self {
        self.max_launch_depth = depth;
        self
    }

    /// Runs every workflow bound to `event` on the entity's type.
    ///
    /// Call after the entity is persisted and before its change tracking is
    /// reset. Each workflow is independent: one that fails is logged and
    /// counted, and the rest still run.
    ///
    /// # Errors
    ///
    /// Fails if the entity is unsaved or the matching workflows cannot be
    /// loaded.
    #[instrument(skip(self, entity, actor), fields(obj_type = %entity.obj_type, event = %event))]
    pub async fn run_workflows_on_event(
        &self,
        entity: &mut Entity,
        event: EventKind,
        actor: &Actor,
    ) -> Result<EventSummary, Report<WorkflowError>> {
        if entity.id.is_none() {
            return Err(WorkflowError::UnsavedEntity {
                obj_type: entity.obj_type.clone(),
            }
            .into());
        }
        let workflows = self
            .matcher
            .get_active_workflows_for_event(&entity.obj_type, actor.account_id, event)
            .await
            .map_err(WorkflowError::from)?;

        let mut summary = EventSummary::default();
        for workflow in &workflows {
            match self
                .start_instance(workflow, entity, actor, Trigger::Event(event), 0)
                .await
            {
                Ok(StartOutcome::Started { instance_id, .. }) => summary.started.push(instance_id),
                Ok(StartOutcome::Skipped(reason)) => {
                    debug!(workflow_id = %workflow.id, ?reason, "workflow skipped");
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(workflow_id = %workflow.id, error = %e, "workflow run failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Runs the children of `parent` for a paused instance without running
    /// `parent` again.
    ///
    /// Does nothing for instances that are no longer running. The caller owns
    /// the continuation and the instance's completion.
    ///
    /// # Errors
    ///
    /// Fails if the action forest cannot be loaded.
    #[instrument(skip_all, fields(action_id = %parent.id, instance_id = %instance.id))]
    pub async fn run_child_actions(
        &self,
        parent: &ActionNode,
        entity: &mut Entity,
        actor: &Actor,
        instance: &mut WorkflowInstance,
    ) -> Result<WalkReport, Report<WorkflowError>> {
        if !instance.is_running() {
            debug!(status = %instance.status, "instance not running; nothing to resume");
            return Ok(WalkReport::default());
        }
        let forest = self.load_forest(parent.account_id, parent.workflow_id).await?;
        let children = forest.children(parent.id);
        Ok(self.walk(&forest, children, entity, actor, instance, 0).await)
    }

    /// Resumes every continuation that is due now.
    ///
    /// # Errors
    ///
    /// Fails only if the due continuations cannot be listed. Failures while
    /// resuming one continuation keep it for the next poll.
    pub async fn run_scheduled_actions(&self) -> Result<ResumeSummary, Report<WorkflowError>> {
        self.run_scheduled_actions_at(Utc::now()).await
    }

    /// Resumes every continuation due at `now`.
    #[instrument(skip(self))]
    pub async fn run_scheduled_actions_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ResumeSummary, Report<WorkflowError>> {
        let due = self
            .mapper
            .get_due_continuations(now)
            .await
            .map_err(WorkflowError::from)?;

        let mut summary = ResumeSummary::default();
        for continuation in &due {
            match self.resume(continuation).await {
                Ok(Resumed::Ran) => summary.resumed += 1,
                Ok(Resumed::Discarded) => summary.discarded += 1,
                Ok(Resumed::Retained) => summary.retained += 1,
                Err(e) => {
                    warn!(
                        instance_id = %continuation.instance_id,
                        action_id = %continuation.action_id,
                        error = %e,
                        "resume failed; continuation kept"
                    );
                    summary.retained += 1;
                }
            }
        }
        if !due.is_empty() {
            info!(
                resumed = summary.resumed,
                discarded = summary.discarded,
                retained = summary.retained,
                "processed due continuations"
            );
        }
        Ok(summary)
    }

    /// Runs periodic workflows for the current period.
    ///
    /// # Errors
    ///
    /// Fails only if the periodic workflows cannot be listed.
    pub async fn run_periodic_workflows(&self) -> Result<PeriodicSummary, Report<WorkflowError>> {
        self.run_periodic_workflows_at(Utc::now()).await
    }

    /// Runs periodic workflows for the period containing `now`.
    #[instrument(skip(self))]
    pub async fn run_periodic_workflows_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<PeriodicSummary, Report<WorkflowError>> {
        let workflows = self
            .mapper
            .get_active_periodic_workflows()
            .await
            .map_err(WorkflowError::from)?;

        let mut summary = PeriodicSummary::default();
        for workflow in &workflows {
            let Some(cadence) = workflow.periodic else {
                continue;
            };
            let period_key = cadence.period_key(now);
            if let Err(e) = self
                .run_periodic_workflow(workflow, &period_key, &mut summary)
                .await
            {
                warn!(workflow_id = %workflow.id, error = %e, "periodic workflow failed");
                summary.failed += 1;
                continue;
            }
            if let Err(e) = self.mapper.mark_workflow_run(workflow.id, now).await {
                warn!(workflow_id = %workflow.id, error = %e, "failed to record last run");
            }
        }
        Ok(summary)
    }

    async fn run_periodic_workflow(
        &self,
        workflow: &WorkflowDefinition,
        period_key: &str,
        summary: &mut PeriodicSummary,
    ) -> Result<(), Report<WorkflowError>> {
        let mut query = EntityQuery::new(workflow.obj_type.clone(), workflow.account_id);
        query.extend_conditions(workflow.conditions.iter().cloned());
        let results = self
            .index
            .execute_query(&query)
            .await
            .map_err(WorkflowError::from)?;
        debug!(
            workflow_id = %workflow.id,
            period_key,
            candidates = results.total_count,
            "running periodic workflow"
        );

        let actor = Actor::new(workflow.owner_id, workflow.account_id);
        for mut entity in results.entities {
            match self
                .start_instance(workflow, &mut entity, &actor, Trigger::Periodic { period_key }, 0)
                .await
            {
                Ok(StartOutcome::Started { .. }) => summary.instances_started += 1,
                Ok(StartOutcome::Skipped(_)) => summary.skipped += 1,
                Err(e) => {
                    warn!(workflow_id = %workflow.id, entity_id = ?entity.id, error = %e, "periodic run failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Gates, creates and walks one instance.
    async fn start_instance(
        &self,
        workflow: &WorkflowDefinition,
        entity: &mut Entity,
        actor: &Actor,
        trigger: Trigger<'_>,
        depth: usize,
    ) -> Result<StartOutcome, Report<WorkflowError>> {
        let Some(entity_id) = entity.id else {
            return Err(WorkflowError::UnsavedEntity {
                obj_type: entity.obj_type.clone(),
            }
            .into());
        };

        if let Trigger::Event(event) = trigger
            && !self.conditions.change_gate_open(workflow, entity, event)
        {
            return Ok(StartOutcome::Skipped(SkipReason::ConditionsUnchanged));
        }
        if self
            .singleton
            .should_skip(workflow, entity_id)
            .await
            .map_err(WorkflowError::from)?
        {
            return Ok(StartOutcome::Skipped(SkipReason::SingletonRunning));
        }
        if !self
            .conditions
            .matches(workflow, entity)
            .await
            .map_err(WorkflowError::from)?
        {
            return Ok(StartOutcome::Skipped(SkipReason::ConditionsUnmet));
        }

        let forest = self.load_forest(workflow.account_id, workflow.id).await?;

        if let Trigger::Periodic { period_key } = trigger
            && !self
                .mapper
                .claim_periodic_run(workflow.id, entity_id, period_key)
                .await
                .map_err(WorkflowError::from)?
        {
            return Ok(StartOutcome::Skipped(SkipReason::AlreadyRanThisPeriod));
        }

        let created = self
            .mapper
            .create_workflow_instance(workflow, entity_id, actor)
            .await;
        if created.is_err()
            && let Trigger::Periodic { period_key } = trigger
        {
            self.release_claim(workflow.id, entity_id, period_key).await;
        }
        let mut instance = match created {
            Ok(instance) => instance,
            Err(DataMapperError::Conflict { reason }) => {
                debug!(workflow_id = %workflow.id, %reason, "singleton insert rejected");
                return Ok(StartOutcome::Skipped(SkipReason::SingletonRunning));
            }
            Err(e) => return Err(WorkflowError::from(e).into()),
        };
        info!(
            workflow_id = %workflow.id,
            instance_id = %instance.id,
            entity_id = %entity_id,
            "workflow instance started"
        );

        let report = self
            .walk(&forest, forest.roots(), entity, actor, &mut instance, depth)
            .await;
        // Once the walk ran, a periodic claim stands even if completion fails to persist.
        if !report.suspended && !report.stopped {
            self.mapper
                .update_instance_status(instance.id, InstanceStatus::Completed)
                .await
                .map_err(WorkflowError::from)?;
            instance.status = InstanceStatus::Completed;
        }
        debug!(
            instance_id = %instance.id,
            status = %instance.status,
            executed = report.executed,
            failed = report.failed,
            "walk finished"
        );

        Ok(StartOutcome::Started {
            instance_id: instance.id,
            status: instance.status,
            report,
        })
    }

    /// Depth-first walk from `start`, in sibling order.
    async fn walk(
        &self,
        forest: &ActionForest,
        start: &[ActionId],
        entity: &mut Entity,
        actor: &Actor,
        instance: &mut WorkflowInstance,
        depth: usize,
    ) -> WalkReport {
        let mut report = WalkReport::default();
        // Popped from the end, so pushed in reverse sibling order.
        let mut pending: Vec<ActionId> = start.iter().rev().copied().collect();

        while let Some(action_id) = pending.pop() {
            let Some(action) = forest.get(action_id) else {
                continue;
            };
            report.executed += 1;

            let outcome = match self.execute_action(action, entity, actor).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        action_id = %action.id,
                        action_type = %action.type_name,
                        category = e.category(),
                        error = %e,
                        "action failed; branch ends"
                    );
                    report.record_failure(&e);
                    continue;
                }
            };

            match outcome {
                ActionOutcome::Succeeded => {
                    pending.extend(forest.children(action_id).iter().rev());
                }
                ActionOutcome::Declined => {
                    debug!(action_id = %action.id, "action declined; branch ends");
                }
                ActionOutcome::Wait { resume_at } => {
                    if let Err(e) = self
                        .mapper
                        .schedule_action(instance.id, action.id, resume_at)
                        .await
                    {
                        warn!(
                            instance_id = %instance.id,
                            action_id = %action.id,
                            error = %e,
                            "failed to persist continuation; branch ends"
                        );
                        report.record_storage_failure(&e);
                        continue;
                    }
                    report.suspended = true;
                    info!(
                        instance_id = %instance.id,
                        action_id = %action.id,
                        %resume_at,
                        "branch paused"
                    );
                }
                ActionOutcome::Stop => {
                    if let Err(e) = self
                        .mapper
                        .update_instance_status(instance.id, InstanceStatus::Stopped)
                        .await
                    {
                        warn!(
                            instance_id = %instance.id,
                            action_id = %action.id,
                            error = %e,
                            "failed to persist stop; walk ends"
                        );
                        report.record_storage_failure(&e);
                        break;
                    }
                    instance.status = InstanceStatus::Stopped;
                    report.stopped = true;
                    info!(instance_id = %instance.id, action_id = %action.id, "instance stopped");
                    break;
                }
                ActionOutcome::Launch { workflow_id } => {
                    match self.launch(workflow_id, entity, actor, depth + 1).await {
                        Ok(started) => {
                            debug!(workflow_id = %workflow_id, ?started, "launched workflow");
                            pending.extend(forest.children(action_id).iter().rev());
                        }
                        Err(e) => {
                            warn!(
                                action_id = %action.id,
                                workflow_id = %workflow_id,
                                error = %e,
                                "launch failed; branch ends"
                            );
                            report.failed += 1;
                        }
                    }
                }
            }
        }
        report
    }

    async fn execute_action(
        &self,
        action: &ActionNode,
        entity: &mut Entity,
        actor: &Actor,
    ) -> Result<ActionOutcome, ActionError> {
        let executor = self.executors.resolve(&action.type_name)?;
        executor.execute(action, entity, actor).await
    }

    // Boxed because launching walks another forest, which can launch again.
    fn launch<'a>(
        &'a self,
        workflow_id: WorkflowId,
        entity: &'a mut Entity,
        actor: &'a Actor,
        depth: usize,
    ) -> BoxFuture<'a, Result<StartOutcome, Report<WorkflowError>>> {
        Box::pin(self.launch_inner(workflow_id, entity, actor, depth))
    }

    async fn launch_inner(
        &self,
        workflow_id: WorkflowId,
        entity: &mut Entity,
        actor: &Actor,
        depth: usize,
    ) -> Result<StartOutcome, Report<WorkflowError>> {
        if depth > self.max_launch_depth {
            return Err(WorkflowError::LaunchDepthExceeded {
                workflow_id,
                depth: self.max_launch_depth,
            }
            .into());
        }
        let workflow = self
            .mapper
            .get_workflow(entity.account_id, workflow_id)
            .await
            .map_err(WorkflowError::from)?;
        if !workflow.active {
            return Ok(StartOutcome::Skipped(SkipReason::Inactive));
        }
        self.start_instance(&workflow, entity, actor, Trigger::Launch, depth)
            .await
    }

    async fn release_claim(
        &self,
        workflow_id: WorkflowId,
        entity_id: EntityId,
        period_key: &str,
    ) {
        if let Err(e) = self
            .mapper
            .release_periodic_run(workflow_id, entity_id, period_key)
            .await
        {
            warn!(
                %workflow_id,
                %entity_id,
                period_key,
                error = %e,
                "failed to release periodic claim"
            );
        }
    }

    async fn load_forest(
        &self,
        account_id: AccountId,
        workflow_id: WorkflowId,
    ) -> Result<ActionForest, Report<WorkflowError>> {
        let actions = self
            .mapper
            .get_workflow_actions(account_id, workflow_id)
            .await
            .map_err(WorkflowError::from)?;
        let forest = ActionForest::build(workflow_id, actions)
            .map_err(|error| WorkflowError::InvalidForest { workflow_id, error })?;
        Ok(forest)
    }

    async fn resume(
        &self,
        continuation: &ScheduledContinuation,
    ) -> Result<Resumed, Report<WorkflowError>> {
        let mut instance = match self
            .mapper
            .get_workflow_instance(continuation.instance_id)
            .await
        {
            Ok(instance) => instance,
            Err(DataMapperError::NotFound { .. }) => {
                return self.discard(continuation, "instance no longer exists").await;
            }
            Err(e) => return Err(WorkflowError::from(e).into()),
        };
        if !instance.is_running() {
            return self.discard(continuation, "instance is not running").await;
        }

        let action = match self
            .mapper
            .get_action(instance.account_id, continuation.action_id)
            .await
        {
            Ok(action) => action,
            Err(DataMapperError::NotFound { .. }) => {
                return self.discard(continuation, "action no longer exists").await;
            }
            Err(e) => return Err(WorkflowError::from(e).into()),
        };
        let workflow = match self
            .mapper
            .get_workflow(instance.account_id, instance.workflow_id)
            .await
        {
            Ok(workflow) => workflow,
            Err(DataMapperError::NotFound { .. }) => {
                return self.discard(continuation, "workflow no longer exists").await;
            }
            Err(e) => return Err(WorkflowError::from(e).into()),
        };
        let mut entity = match self
            .entities
            .get(&workflow.obj_type, instance.entity_id, instance.account_id)
            .await
        {
            Ok(entity) => entity,
            Err(EntityError::NotFound { .. }) => {
                return self.discard(continuation, "entity no longer exists").await;
            }
            Err(e) => return Err(WorkflowError::from(e).into()),
        };

        let actor = Actor::new(instance.user_id, instance.account_id);
        let report = self
            .run_child_actions(&action, &mut entity, &actor, &mut instance)
            .await?;
        if report.transient_failures > 0 {
            warn!(
                instance_id = %instance.id,
                action_id = %action.id,
                failures = report.transient_failures,
                "resumed branch hit transient failures; continuation kept"
            );
            return Ok(Resumed::Retained);
        }

        self.mapper
            .delete_scheduled_action(continuation.instance_id, continuation.action_id)
            .await
            .map_err(WorkflowError::from)?;
        if instance.is_running()
            && !self
                .mapper
                .has_scheduled_actions(instance.id)
                .await
                .map_err(WorkflowError::from)?
        {
            self.mapper
                .update_instance_status(instance.id, InstanceStatus::Completed)
                .await
                .map_err(WorkflowError::from)?;
        }
        Ok(Resumed::Ran)
    }

    async fn discard(
        &self,
        continuation: &ScheduledContinuation,
        reason: &str,
    ) -> Result<Resumed, Report<WorkflowError>> {
        self.mapper
            .delete_scheduled_action(continuation.instance_id, continuation.action_id)
            .await
            .map_err(WorkflowError::from)?;
        info!(
            instance_id = %continuation.instance_id,
            action_id = %continuation.action_id,
            reason,
            "continuation discarded"
        );
        Ok(Resumed::Discarded)
    }
}
