//! Shared test infrastructure for the workflow engine tests.
//!
//! `setup()` wires the engine and the admin service to in-memory stores, a fixed
//! clock and a recording notifier. `finish()` shuts the notification task down and
//! returns everything it delivered.
#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use ideaflow::clock::FixedClock;
use ideaflow::engine::{Actor, TransitionEngine, WorkflowAdmin};
use ideaflow::models::idea::{Idea, NewIdea};
use ideaflow::models::workflow::{ConditionType, NewCondition, NewStage, NewWorkflow, Operator, Workflow};
use ideaflow::notify::{DispatcherHandle, Notification, NotificationDispatcher, RecordingNotifier};
use ideaflow::store::IdeaStore;
use ideaflow::store::memory::{MemoryDirectory, MemoryIdeaStore, MemoryWorkflowStore};

// ============================================================================
// TEST CONSTANTS
// ============================================================================

pub const ADMIN_ID: i64 = 1;
pub const AUTHOR_ID: i64 = 2;

pub const DIVISION: &str = "D01";
pub const DEPARTMENT: &str = "DEP-A";
pub const CATEGORY: &str = "CAT-1";

pub fn admin() -> Actor {
    Actor::admin(ADMIN_ID)
}

pub fn author() -> Actor {
    Actor::user(AUTHOR_ID)
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

// ============================================================================
// ENVIRONMENT
// ============================================================================

pub struct TestEnv {
    pub workflows: Arc<MemoryWorkflowStore>,
    pub ideas: Arc<MemoryIdeaStore>,
    pub directory: Arc<MemoryDirectory>,
    pub clock: Arc<FixedClock>,
    pub recorder: Arc<RecordingNotifier>,
    pub engine: TransitionEngine,
    pub admin: WorkflowAdmin,
    handle: DispatcherHandle,
}

pub async fn setup() -> TestEnv {
    let workflows = Arc::new(MemoryWorkflowStore::new());
    let ideas = Arc::new(MemoryIdeaStore::new());
    let directory = Arc::new(MemoryDirectory::new());
    let clock = Arc::new(FixedClock::new(start_time()));
    let recorder = Arc::new(RecordingNotifier::new());
    let (dispatcher, handle) = NotificationDispatcher::spawn(recorder.clone(), 64);

    directory.add_user(ADMIN_ID, "admin", "Administrator").await;
    directory.add_user(AUTHOR_ID, "author", "Idea Author").await;

    let engine = TransitionEngine::new(
        ideas.clone(),
        workflows.clone(),
        directory.clone(),
        dispatcher,
        clock.clone(),
    );
    let admin = WorkflowAdmin::new(workflows.clone(), ideas.clone(), clock.clone());

    TestEnv {
        workflows,
        ideas,
        directory,
        clock,
        recorder,
        engine,
        admin,
        handle,
    }
}

impl TestEnv {
    /// Stop the notification task and return every delivered notification.
    pub async fn finish(self) -> Vec<Notification> {
        let TestEnv {
            engine,
            handle,
            recorder,
            ..
        } = self;
        drop(engine);
        handle.join().await;
        recorder.delivered().await
    }

    pub fn advance(&self, by: Duration) {
        self.clock.set(start_time() + by);
    }

    pub async fn create_workflow(
        &self,
        name: &str,
        priority: i32,
        stages: Vec<NewStage>,
        conditions: Vec<NewCondition>,
    ) -> Workflow {
        let input = NewWorkflow {
            name: name.to_string(),
            description: String::new(),
            is_active: true,
            priority,
            stages,
            conditions,
        };
        self.admin.create_workflow(&input, admin()).await.unwrap()
    }

    /// Linear workflow `1..=count`, stage n at level n, no conditions.
    pub async fn linear_workflow(&self, name: &str, priority: i32, count: i32) -> Workflow {
        let stages = (1..=count).map(|n| stage(n, n as i64, true, false)).collect();
        self.create_workflow(name, priority, stages, Vec::new()).await
    }

    /// Add a user holding a home role at `level_id`.
    pub async fn approver(&self, user_id: i64, level_id: i64, division: Option<&str>, department: Option<&str>) {
        self.directory
            .add_user(user_id, &format!("user{user_id}"), &format!("User {user_id}"))
            .await;
        self.directory.assign_role(user_id, level_id, division, department).await;
    }

    pub async fn draft(&self, saving_cost: f64) -> Idea {
        self.draft_in(saving_cost, DIVISION, DEPARTMENT).await
    }

    pub async fn draft_in(&self, saving_cost: f64, division: &str, department: &str) -> Idea {
        let input = NewIdea {
            title: format!("Idea saving {saving_cost}"),
            submitted_by: AUTHOR_ID,
            category_id: CATEGORY.to_string(),
            target_division_id: division.to_string(),
            target_department_id: department.to_string(),
            saving_cost,
            event_id: None,
        };
        self.ideas.insert(&input).await.unwrap()
    }

    pub async fn submitted(&self, saving_cost: f64) -> Idea {
        let idea = self.draft(saving_cost).await;
        self.engine.submit(idea.id, author()).await.unwrap()
    }
}

// ============================================================================
// BUILDERS
// ============================================================================

pub fn stage(stage: i32, level_id: i64, is_mandatory: bool, is_parallel: bool) -> NewStage {
    NewStage {
        stage,
        level_id,
        is_mandatory,
        is_parallel,
    }
}

pub fn cond(condition_type: ConditionType, operator: Operator, value: &str) -> NewCondition {
    NewCondition {
        condition_type,
        operator,
        condition_value: value.to_string(),
        is_active: true,
    }
}
