//! Idea state machine: submit, approve, reject, bypass, delete.

mod common;

use common::*;
use ideaflow::audit::AuditAction;
use ideaflow::engine::Actor;
use ideaflow::errors::AppError;
use ideaflow::models::idea::IdeaStatus;
use ideaflow::notify::NotificationTemplate;

/// Three mandatory stages at levels 10/20/30 with one approver each.
async fn staffed_env() -> (TestEnv, i64) {
    let env = setup().await;
    let w = env
        .create_workflow(
            "Standard",
            100,
            vec![stage(1, 10, true, false), stage(2, 20, true, false), stage(3, 30, true, false)],
            Vec::new(),
        )
        .await;
    env.approver(11, 10, Some(DIVISION), Some(DEPARTMENT)).await;
    env.approver(21, 20, Some(DIVISION), None).await;
    env.approver(31, 30, None, None).await;
    (env, w.id)
}

// --- Submit ---

#[tokio::test]
async fn test_submit_routes_to_first_stage() {
    let (env, wf) = staffed_env().await;
    let draft = env.draft(500.0).await;
    assert_eq!(draft.current_status, IdeaStatus::Draft);

    let idea = env.engine.submit(draft.id, author()).await.unwrap();
    assert_eq!(idea.workflow_id, Some(wf));
    assert_eq!(idea.current_stage, 1);
    assert_eq!(idea.max_stage, 3);
    assert_eq!(idea.current_status, IdeaStatus::Pending);
    assert_eq!(idea.version, draft.version + 1);

    let notes = env.finish().await;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].template, NotificationTemplate::ApprovalRequested);
    assert_eq!(notes[0].recipients, vec![11]);
}

#[tokio::test]
async fn test_submit_without_applicable_workflow_fails() {
    let env = setup().await;
    env.create_workflow(
        "Only D02",
        10,
        vec![stage(1, 10, true, false)],
        vec![cond(
            ideaflow::models::workflow::ConditionType::Division,
            ideaflow::models::workflow::Operator::Eq,
            "D02",
        )],
    )
    .await;
    let draft = env.draft(1.0).await;

    let err = env.engine.submit(draft.id, author()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    let unchanged = env.engine.get_idea(draft.id).await.unwrap();
    assert_eq!(unchanged.current_status, IdeaStatus::Draft);
    assert_eq!(unchanged.version, draft.version);
}

#[tokio::test]
async fn test_submit_by_stranger_is_denied() {
    let (env, _) = staffed_env().await;
    let draft = env.draft(1.0).await;
    let err = env.engine.submit(draft.id, Actor::user(99)).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_submit_twice_is_invalid() {
    let (env, _) = staffed_env().await;
    let idea = env.submitted(1.0).await;
    let err = env.engine.submit(idea.id, author()).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn test_submit_fails_when_first_stage_unstaffed() {
    let env = setup().await;
    env.create_workflow("Nobody home", 10, vec![stage(1, 77, true, false)], Vec::new())
        .await;
    let draft = env.draft(1.0).await;
    let err = env.engine.submit(draft.id, author()).await.unwrap_err();
    assert!(matches!(err, AppError::NoEligibleApprover { stage: 1, .. }));
}

// --- Approve ---

#[tokio::test]
async fn test_full_approval_path_completes_idea() {
    let (env, _) = staffed_env().await;
    let idea = env.submitted(1.0).await;

    let idea = env.engine.approve(idea.id, 1, Actor::user(11)).await.unwrap();
    assert_eq!((idea.current_stage, idea.current_status), (2, IdeaStatus::Pending));
    let idea = env.engine.approve(idea.id, 2, Actor::user(21)).await.unwrap();
    assert_eq!((idea.current_stage, idea.current_status), (3, IdeaStatus::Pending));
    let idea = env.engine.approve(idea.id, 3, Actor::user(31)).await.unwrap();
    assert_eq!((idea.current_stage, idea.current_status), (3, IdeaStatus::Completed));

    let trail = env.engine.audit_trail(idea.id).await.unwrap();
    let actions: Vec<AuditAction> = trail.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::Submitted,
            AuditAction::Approved,
            AuditAction::Approved,
            AuditAction::Approved
        ]
    );
    assert_eq!(trail[3].from.stage, 3);
    assert_eq!(trail[3].to.status, IdeaStatus::Completed);
    assert_eq!(trail[3].actor_id, 31);

    let notes = env.finish().await;
    assert_eq!(notes.last().map(|n| n.template), Some(NotificationTemplate::IdeaCompleted));
    assert_eq!(notes.last().map(|n| n.recipients.clone()), Some(vec![AUTHOR_ID]));
}

#[tokio::test]
async fn test_stage_never_exceeds_max_stage() {
    let (env, _) = staffed_env().await;
    let idea = env.submitted(1.0).await;
    for (stage, user) in [(1, 11), (2, 21), (3, 31)] {
        let current = env.engine.approve(idea.id, stage, Actor::user(user)).await.unwrap();
        assert!(current.current_stage >= 1 && current.current_stage <= current.max_stage);
    }
    let err = env.engine.approve(idea.id, 3, Actor::user(31)).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn test_approve_wrong_stage_is_invalid() {
    let (env, _) = staffed_env().await;
    let idea = env.submitted(1.0).await;
    let err = env.engine.approve(idea.id, 2, Actor::user(21)).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn test_approve_by_non_approver_is_denied() {
    let (env, _) = staffed_env().await;
    let idea = env.submitted(1.0).await;
    let err = env.engine.approve(idea.id, 1, Actor::user(21)).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
    let err = env.engine.approve(idea.id, 1, admin()).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_approve_draft_is_invalid() {
    let (env, _) = staffed_env().await;
    let draft = env.draft(1.0).await;
    let err = env.engine.approve(draft.id, 1, Actor::user(11)).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn test_approve_into_unstaffed_mandatory_stage_commits_nothing() {
    let env = setup().await;
    env.create_workflow(
        "Gap",
        10,
        vec![stage(1, 10, true, false), stage(2, 88, true, false)],
        Vec::new(),
    )
    .await;
    env.approver(11, 10, Some(DIVISION), Some(DEPARTMENT)).await;
    let idea = env.submitted(1.0).await;

    let err = env.engine.approve(idea.id, 1, Actor::user(11)).await.unwrap_err();
    assert!(matches!(err, AppError::NoEligibleApprover { stage: 2, .. }));
    let stored = env.engine.get_idea(idea.id).await.unwrap();
    assert_eq!(stored.current_stage, 1);
    assert_eq!(stored.version, idea.version);
}

#[tokio::test]
async fn test_optional_unstaffed_stage_is_skipped() {
    let env = setup().await;
    env.create_workflow(
        "Optional middle",
        10,
        vec![stage(1, 10, true, false), stage(2, 88, false, false), stage(3, 30, true, false)],
        Vec::new(),
    )
    .await;
    env.approver(11, 10, Some(DIVISION), Some(DEPARTMENT)).await;
    env.approver(31, 30, None, None).await;
    let idea = env.submitted(1.0).await;

    let idea = env.engine.approve(idea.id, 1, Actor::user(11)).await.unwrap();
    assert_eq!(idea.current_stage, 3);
}

// --- Parallel stages ---

#[tokio::test]
async fn test_parallel_stages_wait_for_every_signature() {
    let env = setup().await;
    env.create_workflow(
        "Parallel",
        10,
        vec![
            stage(1, 10, true, false),
            stage(2, 20, true, true),
            stage(3, 30, true, true),
            stage(4, 40, true, false),
        ],
        Vec::new(),
    )
    .await;
    env.approver(11, 10, Some(DIVISION), Some(DEPARTMENT)).await;
    env.approver(21, 20, None, None).await;
    env.approver(31, 30, None, None).await;
    env.approver(41, 40, None, None).await;
    let idea = env.submitted(1.0).await;

    let idea = env.engine.approve(idea.id, 1, Actor::user(11)).await.unwrap();
    assert_eq!(idea.current_stage, 2);

    let idea = env.engine.approve(idea.id, 3, Actor::user(31)).await.unwrap();
    assert_eq!(idea.current_stage, 2);
    assert_eq!(idea.approved_stages, vec![3]);

    let err = env.engine.approve(idea.id, 3, Actor::user(31)).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));

    let idea = env.engine.approve(idea.id, 2, Actor::user(21)).await.unwrap();
    assert_eq!(idea.current_stage, 4);
    assert!(idea.approved_stages.is_empty());

    let notes = env.finish().await;
    let stage_two = notes
        .iter()
        .find(|n| n.template == NotificationTemplate::ApprovalRequested && n.context["stage"] == 2)
        .unwrap();
    assert_eq!(stage_two.recipients, vec![21, 31]);
}

// --- Reject ---

#[tokio::test]
async fn test_reject_is_terminal() {
    let (env, _) = staffed_env().await;
    let idea = env.submitted(1.0).await;

    let rejected = env
        .engine
        .reject(idea.id, 1, "Duplicate of an earlier idea", Actor::user(11))
        .await
        .unwrap();
    assert_eq!(rejected.current_status, IdeaStatus::Rejected);
    assert!(rejected.is_rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("Duplicate of an earlier idea"));

    let err = env.engine.approve(idea.id, 1, Actor::user(11)).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));
    let err = env.engine.reject(idea.id, 1, "again", Actor::user(11)).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));
    let err = env.engine.bypass(idea.id, 1, admin(), None).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));

    let trail = env.engine.audit_trail(idea.id).await.unwrap();
    assert_eq!(trail.last().map(|e| e.action), Some(AuditAction::Rejected));
    assert_eq!(
        trail.last().and_then(|e| e.reason.clone()).as_deref(),
        Some("Duplicate of an earlier idea")
    );

    let notes = env.finish().await;
    assert!(notes
        .iter()
        .any(|n| n.template == NotificationTemplate::IdeaRejected && n.recipients == vec![AUTHOR_ID]));
}

#[tokio::test]
async fn test_reject_requires_reason() {
    let (env, _) = staffed_env().await;
    let idea = env.submitted(1.0).await;
    let err = env.engine.reject(idea.id, 1, "   ", Actor::user(11)).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    let stored = env.engine.get_idea(idea.id).await.unwrap();
    assert_eq!(stored.current_status, IdeaStatus::Pending);
}

// --- Bypass ---

#[tokio::test]
async fn test_bypass_requires_admin() {
    let (env, _) = staffed_env().await;
    let idea = env.submitted(1.0).await;
    let err = env.engine.bypass(idea.id, 1, Actor::user(11), None).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
}

#[tokio::test]
async fn test_bypass_moves_past_stage_and_is_audited() {
    let (env, _) = staffed_env().await;
    let idea = env.submitted(1.0).await;

    let idea = env
        .engine
        .bypass(idea.id, 1, admin(), Some("Approver on leave"))
        .await
        .unwrap();
    assert_eq!(idea.current_stage, 2);

    let trail = env.engine.audit_trail(idea.id).await.unwrap();
    let entry = trail.last().unwrap();
    assert_eq!(entry.action, AuditAction::Bypassed);
    assert_eq!(entry.actor_id, ADMIN_ID);
    assert_eq!(entry.reason.as_deref(), Some("Approver on leave"));
    assert_eq!(entry.details["bypassed_stages"], serde_json::json!([1]));
}

#[tokio::test]
async fn test_bypass_parks_at_unstaffed_mandatory_stage() {
    let env = setup().await;
    env.create_workflow(
        "Unstaffed middle",
        10,
        vec![stage(1, 10, true, false), stage(2, 88, true, false), stage(3, 30, true, false)],
        Vec::new(),
    )
    .await;
    env.approver(11, 10, Some(DIVISION), Some(DEPARTMENT)).await;
    env.approver(31, 30, None, None).await;
    let idea = env.submitted(1.0).await;

    let idea = env.engine.bypass(idea.id, 1, admin(), None).await.unwrap();
    assert_eq!(idea.current_stage, 2);
    let idea = env.engine.bypass(idea.id, 2, admin(), None).await.unwrap();
    assert_eq!(idea.current_stage, 3);
    let idea = env.engine.bypass(idea.id, 3, admin(), None).await.unwrap();
    assert_eq!(idea.current_status, IdeaStatus::Completed);
}

// --- Delete ---

#[tokio::test]
async fn test_deleted_idea_accepts_no_transition() {
    let (env, _) = staffed_env().await;
    let idea = env.submitted(1.0).await;

    let deleted = env.engine.delete(idea.id, author()).await.unwrap();
    assert!(deleted.is_deleted);

    let err = env.engine.approve(idea.id, 1, Actor::user(11)).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));
    let err = env.engine.delete(idea.id, author()).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));
    assert!(env.engine.pending_approvals(11).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_completed_idea_is_invalid() {
    let env = setup().await;
    env.create_workflow("One step", 10, vec![stage(1, 10, true, false)], Vec::new())
        .await;
    env.approver(11, 10, None, None).await;
    let idea = env.submitted(1.0).await;
    env.engine.approve(idea.id, 1, Actor::user(11)).await.unwrap();

    let err = env.engine.delete(idea.id, admin()).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn test_delete_by_stranger_is_denied() {
    let (env, _) = staffed_env().await;
    let draft = env.draft(1.0).await;
    let err = env.engine.delete(draft.id, Actor::user(11)).await.unwrap_err();
    assert!(matches!(err, AppError::PermissionDenied(_)));
}

// --- Inbox ---

#[tokio::test]
async fn test_pending_approvals_follow_the_idea() {
    let (env, _) = staffed_env().await;
    let idea = env.submitted(1.0).await;

    let inbox = env.engine.pending_approvals(11).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!((inbox[0].idea_id, inbox[0].stage), (idea.id, 1));
    assert!(env.engine.pending_approvals(21).await.unwrap().is_empty());

    env.engine.approve(idea.id, 1, Actor::user(11)).await.unwrap();
    assert!(env.engine.pending_approvals(11).await.unwrap().is_empty());
    assert_eq!(env.engine.pending_approvals(21).await.unwrap().len(), 1);
}
