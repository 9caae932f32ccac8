// Tests for the workflow engine, gates and approval service

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::super::approvals::*;
    use super::super::boundary::*;
    use super::super::engine::*;
    use super::super::errors::*;
    use super::super::gates::*;
    use super::super::reconciliation::*;
    use super::super::traits::*;
    use super::super::types::*;
    use crate::config::GateConfig;
    use crate::queue::{DeferredJobQueue, RecordingJobQueue};
    use crate::store::InMemoryStore;

    async fn seeded(store: &InMemoryStore, state: WorkflowState) -> WorkflowRecord {
        let mut record = WorkflowRecord::new(OrganizationId::new());
        record.state = state;
        WorkflowRepository::create(store, &record).await.unwrap();
        record
    }

    fn engine(store: Arc<InMemoryStore>, queue: Arc<RecordingJobQueue>) -> TransitionEngine {
        TransitionEngine::new(store.clone(), BoundaryEmitter::new(queue, RetryPolicy::no_retry()))
            .with_inconsistency_log(store)
    }

    async fn state_of(store: &InMemoryStore, record: &WorkflowRecord) -> WorkflowState {
        WorkflowRepository::get(store, &record.id, &record.organization_id)
            .await
            .unwrap()
            .unwrap()
            .state
    }

    fn actor() -> ActorId {
        ActorId::new("user-42")
    }

    #[tokio::test]
    async fn test_icp_completed_skips_to_competitors_without_emission() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let engine = engine(store.clone(), queue.clone());
        let record = seeded(&store, WorkflowState::Step0Init).await;

        let outcome = engine
            .transition(&record.id, &record.organization_id, WorkflowEvent::IcpCompleted, &actor())
            .await
            .unwrap();

        let applied = outcome.applied().unwrap();
        assert_eq!(applied.to, WorkflowState::Step2Competitors);
        assert_eq!(applied.current_step, Some(2));
        assert!(applied.emitted.is_none());
        assert!(queue.sent().is_empty());

        let stored = WorkflowRepository::get(store.as_ref(), &record.id, &record.organization_id)
            .await
            .unwrap()
            .unwrap();
        let progress = stored.step_progress(0).unwrap();
        assert!(progress.completed_at.is_some());
        assert_eq!(progress.completed_by.as_ref().unwrap(), "user-42");
    }

    #[tokio::test]
    async fn test_seeds_approved_emits_longtail_expansion() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let engine = engine(store.clone(), queue.clone());
        let record = seeded(&store, WorkflowState::Step3Seeds).await;

        let outcome = engine
            .transition(&record.id, &record.organization_id, WorkflowEvent::SeedsApproved, &actor())
            .await
            .unwrap();

        assert_eq!(outcome.applied().unwrap().to, WorkflowState::Step4Longtails);
        let sent = queue.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].name, LONGTAIL_EXPANSION_EVENT);
        assert_eq!(sent[0].workflow_id(), Some(record.id.to_string().as_str()));
        assert_eq!(
            sent[0].idempotency_key,
            format!("{}:step_3_seeds:{}", record.id, LONGTAIL_EXPANSION_EVENT)
        );
    }

    #[tokio::test]
    async fn test_illegal_transition_is_rejected_and_state_unchanged() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let engine = engine(store.clone(), queue.clone());
        let record = seeded(&store, WorkflowState::Step3Seeds).await;

        let err = engine
            .transition(
                &record.id,
                &record.organization_id,
                WorkflowEvent::ArticlesCompleted,
                &actor(),
            )
            .await
            .unwrap_err();

        match &err {
            WorkflowError::Transition(rejection) => {
                assert_eq!(rejection.state, WorkflowState::Step3Seeds);
                assert_eq!(
                    rejection.valid_events,
                    vec![
                        WorkflowEvent::SeedsApproved,
                        WorkflowEvent::Fail,
                        WorkflowEvent::Cancel
                    ]
                );
            }
            other => panic!("expected transition error, got {other:?}"),
        }
        assert_eq!(err.class(), ErrorClass::InvalidRequest);
        assert_eq!(state_of(&store, &record).await, WorkflowState::Step3Seeds);
    }

    #[tokio::test]
    async fn test_repeat_of_applied_event_is_rejected_not_replayed() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let engine = engine(store.clone(), queue.clone());
        let record = seeded(&store, WorkflowState::Step3Seeds).await;

        engine
            .transition(&record.id, &record.organization_id, WorkflowEvent::SeedsApproved, &actor())
            .await
            .unwrap();
        let second = engine
            .transition(&record.id, &record.organization_id, WorkflowEvent::SeedsApproved, &actor())
            .await;

        assert!(matches!(second, Err(WorkflowError::Transition(_))));
        assert_eq!(queue.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_states_accept_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let engine = engine(store.clone(), queue);

        for terminal in [
            WorkflowState::Completed,
            WorkflowState::Cancelled,
            WorkflowState::Failed,
        ] {
            let record = seeded(&store, terminal).await;
            for event in WorkflowEvent::ALL {
                let result = engine
                    .transition(&record.id, &record.organization_id, event, &actor())
                    .await;
                assert!(
                    matches!(result, Err(WorkflowError::Transition(ref e)) if e.valid_events.is_empty()),
                    "{terminal} accepted {event}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_lost_compare_and_set_is_a_no_op() {
        let mut repository = MockWorkflowRepository::new();
        let mut record = WorkflowRecord::new(OrganizationId::new());
        record.state = WorkflowState::Step8Subtopics;
        let stored = record.clone();
        repository
            .expect_get()
            .returning(move |_, _| Ok(Some(stored.clone())));
        repository
            .expect_conditional_update()
            .times(1)
            .returning(|_, _, _, _, _| Ok(false));

        let mut queue = MockJobQueue::new();
        queue.expect_send().times(0);

        let engine = TransitionEngine::new(
            Arc::new(repository),
            BoundaryEmitter::new(Arc::new(queue), RetryPolicy::no_retry()),
        );
        let outcome = engine
            .transition(
                &record.id,
                &record.organization_id,
                WorkflowEvent::SubtopicsApproved,
                &actor(),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TransitionOutcome::ConcurrentTransition {
                workflow_id: record.id,
                expected: WorkflowState::Step8Subtopics,
                event: WorkflowEvent::SubtopicsApproved,
            }
        );
        assert!(outcome.message().contains("concurrent transition occurred"));
    }

    #[tokio::test]
    async fn test_emission_failure_is_loud_and_logged() {
        let store = Arc::new(InMemoryStore::new());
        let record = seeded(&store, WorkflowState::Step8Subtopics).await;

        let mut queue = MockJobQueue::new();
        queue.expect_send().times(1).returning(|event| {
            Err(QueueError::Rejected {
                event: event.name.clone(),
                status: 500,
            })
        });
        let mut log = MockInconsistencyLog::new();
        log.expect_record()
            .times(1)
            .withf(|pending| {
                pending.boundary_state == WorkflowState::Step8Subtopics
                    && pending.event.name == ARTICLE_QUEUING_EVENT
            })
            .returning(|_| Ok(()));

        let engine = TransitionEngine::new(
            store.clone(),
            BoundaryEmitter::new(Arc::new(queue), RetryPolicy::no_retry()),
        )
        .with_inconsistency_log(Arc::new(log));

        let err = engine
            .transition(
                &record.id,
                &record.organization_id,
                WorkflowEvent::SubtopicsApproved,
                &actor(),
            )
            .await
            .unwrap_err();

        match &err {
            WorkflowError::EmissionInconsistency {
                workflow_id,
                boundary_state,
                event_name,
                ..
            } => {
                assert_eq!(*workflow_id, record.id);
                assert_eq!(*boundary_state, WorkflowState::Step8Subtopics);
                assert_eq!(event_name, ARTICLE_QUEUING_EVENT);
            }
            other => panic!("expected emission inconsistency, got {other:?}"),
        }
        assert_eq!(err.class(), ErrorClass::Internal);
        assert_eq!(state_of(&store, &record).await, WorkflowState::Step9Articles);
    }

    #[tokio::test]
    async fn test_failed_inconsistency_log_does_not_mask_the_error() {
        let store = Arc::new(InMemoryStore::new());
        let record = seeded(&store, WorkflowState::Step3Seeds).await;

        let queue = Arc::new(RecordingJobQueue::new());
        queue.fail_next(QueueError::Transport("reset".to_string()));
        let mut log = MockInconsistencyLog::new();
        log.expect_record()
            .returning(|_| Err(StoreError::Unavailable("disk full".to_string())));

        let engine = TransitionEngine::new(
            store.clone(),
            BoundaryEmitter::new(queue, RetryPolicy::no_retry()),
        )
        .with_inconsistency_log(Arc::new(log));

        let result = engine
            .transition(&record.id, &record.organization_id, WorkflowEvent::SeedsApproved, &actor())
            .await;
        assert!(matches!(
            result,
            Err(WorkflowError::EmissionInconsistency { .. })
        ));
    }

    #[tokio::test]
    async fn test_wrong_organization_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let engine = engine(store.clone(), queue);
        let record = seeded(&store, WorkflowState::Step1Icp).await;

        let err = engine
            .transition(&record.id, &OrganizationId::new(), WorkflowEvent::IcpCompleted, &actor())
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::NotFound { workflow_id } if workflow_id == record.id));
        assert_eq!(state_of(&store, &record).await, WorkflowState::Step1Icp);
    }

    #[tokio::test]
    async fn test_unknown_event_name_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let engine = engine(store.clone(), queue);
        let record = seeded(&store, WorkflowState::Step1Icp).await;

        let err = engine
            .transition_named(&record.id, &record.organization_id, "PUBLISH", &actor())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownEvent(_)));

        let outcome = engine
            .transition_named(&record.id, &record.organization_id, "icp_completed", &actor())
            .await
            .unwrap();
        assert!(outcome.is_applied());
    }

    #[tokio::test]
    async fn test_corrupt_persisted_state_fails_fast() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let engine = engine(store.clone(), queue);
        let record = seeded(&store, WorkflowState::Step4Longtails).await;
        store
            .put_raw_state(&record.id, "step_4_longtails_ready")
            .await
            .unwrap();

        let err = engine
            .transition(
                &record.id,
                &record.organization_id,
                WorkflowEvent::LongtailsCompleted,
                &actor(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownState(ref e) if e.value == "step_4_longtails_ready"));
    }

    #[tokio::test]
    async fn test_fail_records_reason_on_the_step_left() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let engine = engine(store.clone(), queue);
        let record = seeded(&store, WorkflowState::Step5Filtering).await;

        let request = TransitionRequest::new(
            record.id,
            record.organization_id,
            WorkflowEvent::Fail,
            ActorId::new("filtering-worker"),
        )
        .with_reason("keyword provider returned 503");
        let outcome = engine.apply(&request).await.unwrap();
        assert_eq!(outcome.applied().unwrap().current_step, None);

        let stored = WorkflowRepository::get(store.as_ref(), &record.id, &record.organization_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, WorkflowState::Failed);
        let progress = stored.step_progress(5).unwrap();
        assert!(progress.completed_at.is_none());
        assert_eq!(
            progress.error_message.as_deref(),
            Some("keyword provider returned 503")
        );
    }

    #[tokio::test]
    async fn test_storage_failure_is_internal() {
        let mut repository = MockWorkflowRepository::new();
        repository
            .expect_get()
            .returning(|_, _| Err(StoreError::Unavailable("connection refused".to_string())));
        let engine = TransitionEngine::new(
            Arc::new(repository),
            BoundaryEmitter::new(Arc::new(RecordingJobQueue::new()), RetryPolicy::no_retry()),
        );

        let err = engine
            .transition(
                &WorkflowId::new(),
                &OrganizationId::new(),
                WorkflowEvent::IcpStarted,
                &actor(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Storage { .. }));
        assert!(!err.user_message().contains("connection refused"));
    }

    // Gates

    fn gate_config(fail_open_per_minute: u32) -> GateConfig {
        GateConfig {
            icp_read_timeout_ms: 50,
            icp_fail_open_per_minute: fail_open_per_minute,
        }
    }

    #[tokio::test]
    async fn test_icp_gate_follows_workflow_progress() {
        let store = Arc::new(InMemoryStore::new());
        let gate = IcpCompletionGate::new(store.clone(), &gate_config(30));

        let early = seeded(&store, WorkflowState::Step1Icp).await;
        let later = seeded(&store, WorkflowState::Step6Clustering).await;
        let failed = seeded(&store, WorkflowState::Failed).await;

        let decision = gate
            .validate_icp_completion(&early.id, &early.organization_id)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.status, GateStatus::Blocked);

        let decision = gate
            .validate_icp_completion(&later.id, &later.organization_id)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.status, GateStatus::Allowed);

        let decision = gate
            .validate_icp_completion(&failed.id, &failed.organization_id)
            .await;
        assert!(!decision.allowed);

        let decision = gate
            .validate_icp_completion(&later.id, &OrganizationId::new())
            .await;
        assert_eq!(decision.status, GateStatus::NotFound);
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn test_icp_gate_fails_open_on_storage_error() {
        let mut repository = MockWorkflowRepository::new();
        repository
            .expect_get()
            .returning(|_, _| Err(StoreError::Unavailable("pool exhausted".to_string())));
        let gate = IcpCompletionGate::new(Arc::new(repository), &gate_config(30));

        let decision = gate
            .validate_icp_completion(&WorkflowId::new(), &OrganizationId::new())
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.status, GateStatus::FailOpen);
        assert!(decision.error.unwrap().contains("pool exhausted"));
    }

    #[tokio::test]
    async fn test_icp_gate_fails_closed_on_corrupt_state() {
        let store = Arc::new(InMemoryStore::new());
        let gate = IcpCompletionGate::new(store.clone(), &gate_config(30));
        let record = seeded(&store, WorkflowState::Step5Filtering).await;
        store
            .put_raw_state(&record.id, "step_4_longtails_ready")
            .await
            .unwrap();

        let decision = gate
            .validate_icp_completion(&record.id, &record.organization_id)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.status, GateStatus::FailClosed);
        assert!(decision.error.unwrap().contains("step_4_longtails_ready"));

        // The fail-open quota is untouched by the corrupt row
        store.put_raw_state(&record.id, "step_5_filtering").await.unwrap();
        let decision = gate
            .validate_icp_completion(&record.id, &record.organization_id)
            .await;
        assert_eq!(decision.status, GateStatus::Allowed);
    }

    #[tokio::test]
    async fn test_icp_gate_fails_closed_once_quota_is_spent() {
        let mut repository = MockWorkflowRepository::new();
        repository
            .expect_get()
            .returning(|_, _| Err(StoreError::Unavailable("pool exhausted".to_string())));
        let gate = IcpCompletionGate::new(Arc::new(repository), &gate_config(2));
        let (wf, org) = (WorkflowId::new(), OrganizationId::new());

        assert!(gate.validate_icp_completion(&wf, &org).await.allowed);
        assert!(gate.validate_icp_completion(&wf, &org).await.allowed);
        let third = gate.validate_icp_completion(&wf, &org).await;
        assert!(!third.allowed);
        assert_eq!(third.status, GateStatus::FailClosed);
    }

    /// Never answers within any reasonable budget
    struct StalledRepository;

    #[async_trait]
    impl WorkflowRepository for StalledRepository {
        async fn create(&self, _record: &WorkflowRecord) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get(
            &self,
            _id: &WorkflowId,
            _organization_id: &OrganizationId,
        ) -> Result<Option<WorkflowRecord>, StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn conditional_update(
            &self,
            _id: &WorkflowId,
            _organization_id: &OrganizationId,
            _expected: WorkflowState,
            _next: WorkflowState,
            _stamp: &StepStamp,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_icp_gate_fails_open_on_read_timeout() {
        let gate = IcpCompletionGate::new(Arc::new(StalledRepository), &gate_config(30));
        let decision = gate
            .validate_icp_completion(&WorkflowId::new(), &OrganizationId::new())
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.status, GateStatus::FailOpen);
        assert!(decision.error.unwrap().contains("50"));
    }

    fn approval(record: &WorkflowRecord, entity_id: &str, decision: Decision) -> ApprovalRecord {
        ApprovalRecord {
            organization_id: record.organization_id,
            workflow_id: record.id,
            entity_type: EntityType::Subtopics,
            entity_id: entity_id.to_string(),
            decision,
            feedback: None,
            decided_by: actor(),
            decided_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subtopic_gate_needs_one_approval_in_step_8() {
        let store = Arc::new(InMemoryStore::new());
        let gate = SubtopicApprovalGate::new(store.clone(), store.clone());
        let record = seeded(&store, WorkflowState::Step8Subtopics).await;

        let undecided = gate
            .validate_subtopic_approval_gate(&record.id, &record.organization_id)
            .await;
        assert!(!undecided.allowed);
        assert!(undecided.message.unwrap().contains("no subtopics"));

        store
            .upsert(&approval(&record, "subtopic-a", Decision::Rejected))
            .await
            .unwrap();
        let rejected = gate
            .validate_subtopic_approval_gate(&record.id, &record.organization_id)
            .await;
        assert!(!rejected.allowed);

        store
            .upsert(&approval(&record, "subtopic-b", Decision::Approved))
            .await
            .unwrap();
        let approved = gate
            .validate_subtopic_approval_gate(&record.id, &record.organization_id)
            .await;
        assert!(approved.allowed);
        assert_eq!(approved.status, GateStatus::Allowed);
    }

    #[tokio::test]
    async fn test_subtopic_gate_blocks_outside_step_8() {
        let store = Arc::new(InMemoryStore::new());
        let gate = SubtopicApprovalGate::new(store.clone(), store.clone());
        let record = seeded(&store, WorkflowState::Step7Validation).await;
        store
            .upsert(&approval(&record, "subtopic-a", Decision::Approved))
            .await
            .unwrap();

        let decision = gate
            .validate_subtopic_approval_gate(&record.id, &record.organization_id)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.status, GateStatus::Blocked);
    }

    #[tokio::test]
    async fn test_subtopic_gate_fails_closed_on_storage_error() {
        let store = Arc::new(InMemoryStore::new());
        let record = seeded(&store, WorkflowState::Step8Subtopics).await;
        let mut approvals = MockApprovalRepository::new();
        approvals
            .expect_list_for_workflow()
            .returning(|_, _, _| Err(StoreError::Unavailable("timeout".to_string())));

        let gate = SubtopicApprovalGate::new(store.clone(), Arc::new(approvals));
        let decision = gate
            .validate_subtopic_approval_gate(&record.id, &record.organization_id)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.status, GateStatus::FailClosed);
        assert!(decision.error.is_some());
    }

    // Approval service

    fn service(
        store: Arc<InMemoryStore>,
        queue: Arc<RecordingJobQueue>,
    ) -> ApprovalService {
        let engine = Arc::new(engine(store.clone(), queue));
        ApprovalService::new(store.clone(), store, engine)
    }

    #[tokio::test]
    async fn test_record_decision_validates_and_trims() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(store.clone(), Arc::new(RecordingJobQueue::new()));
        let record = seeded(&store, WorkflowState::Step8Subtopics).await;

        let bad = ApprovalRequest {
            entity_type: "keywords".to_string(),
            entity_id: "k1".to_string(),
            decision: "approved".to_string(),
            feedback: None,
        };
        let err = service
            .record_decision(&record.id, &record.organization_id, &actor(), &bad)
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidRequest);

        let good = ApprovalRequest {
            entity_type: "subtopics".to_string(),
            entity_id: " subtopic-a ".to_string(),
            decision: "approved".to_string(),
            feedback: Some("  looks good  ".to_string()),
        };
        let saved = service
            .record_decision(&record.id, &record.organization_id, &actor(), &good)
            .await
            .unwrap();
        assert_eq!(saved.entity_id, "subtopic-a");
        assert_eq!(saved.feedback.as_deref(), Some("looks good"));

        let err = service
            .record_decision(&record.id, &OrganizationId::new(), &actor(), &good)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_approve_seeds_records_and_hands_off() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let service = service(store.clone(), queue.clone());
        let record = seeded(&store, WorkflowState::Step3Seeds).await;

        let outcome = service
            .approve_seeds(&record.id, &record.organization_id, &actor())
            .await
            .unwrap();
        assert_eq!(outcome.applied().unwrap().to, WorkflowState::Step4Longtails);

        let seed_approval = ApprovalRepository::get(
            store.as_ref(),
            &record.organization_id,
            &record.id,
            EntityType::SeedKeywords,
            WORKFLOW_SCOPE,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(seed_approval.decision, Decision::Approved);
        assert_eq!(queue.sent_named(LONGTAIL_EXPANSION_EVENT).len(), 1);
    }

    #[tokio::test]
    async fn test_approve_seeds_in_wrong_state_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let service = service(store.clone(), Arc::new(RecordingJobQueue::new()));
        let record = seeded(&store, WorkflowState::Step2Competitors).await;

        let err = service
            .approve_seeds(&record.id, &record.organization_id, &actor())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Transition(_)));
        assert!(store.snapshot().await.approvals.is_empty());
    }

    #[tokio::test]
    async fn test_approve_subtopics_is_locked_until_one_is_approved() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let service = service(store.clone(), queue.clone());
        let record = seeded(&store, WorkflowState::Step8Subtopics).await;

        let err = service
            .approve_subtopics(&record.id, &record.organization_id, &actor())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Locked);
        assert!(matches!(
            err,
            WorkflowError::GateBlocked {
                gate: GateKind::SubtopicApproval,
                ..
            }
        ));

        store
            .upsert(&approval(&record, "subtopic-a", Decision::Approved))
            .await
            .unwrap();
        let outcome = service
            .approve_subtopics(&record.id, &record.organization_id, &actor())
            .await
            .unwrap();
        assert_eq!(outcome.applied().unwrap().to, WorkflowState::Step9Articles);
        assert_eq!(queue.sent_named(ARTICLE_QUEUING_EVENT).len(), 1);
    }

    // Reconciliation

    #[tokio::test]
    async fn test_reconciler_replays_with_original_key() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let engine = engine(store.clone(), queue.clone());
        let record = seeded(&store, WorkflowState::Step3Seeds).await;

        queue.fail_next(QueueError::Transport("reset".to_string()));
        let err = engine
            .transition(&record.id, &record.organization_id, WorkflowEvent::SeedsApproved, &actor())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::EmissionInconsistency { .. }));

        let pending = store.pending(10, u32::MAX).await.unwrap();
        assert_eq!(pending.len(), 1);
        let original_key = pending[0].event.idempotency_key.clone();

        let reconciler = Reconciler::new(
            store.clone(),
            BoundaryEmitter::new(queue.clone(), RetryPolicy::no_retry()),
        );
        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.replayed, vec![pending[0].id]);
        assert!(report.failed.is_empty());

        let sent = queue.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].idempotency_key, original_key);
        assert!(store.pending(10, u32::MAX).await.unwrap().is_empty());
    }

    fn article_event(workflow: &str) -> OutboundEvent {
        OutboundEvent {
            name: ARTICLE_QUEUING_EVENT.to_string(),
            data: serde_json::json!({ "workflowId": workflow }),
            idempotency_key: format!("{workflow}:step_8_subtopics:{ARTICLE_QUEUING_EVENT}"),
        }
    }

    fn pending_for(workflow: &str) -> PendingEmission {
        PendingEmission::new(
            WorkflowId::new(),
            OrganizationId::new(),
            WorkflowState::Step8Subtopics,
            article_event(workflow),
            "initial failure",
        )
    }

    #[tokio::test]
    async fn test_reconciler_counts_failures_and_parks_exhausted() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());
        let pending = pending_for("wf");
        store.record(&pending).await.unwrap();

        let reconciler = Reconciler::new(
            store.clone(),
            BoundaryEmitter::new(queue.clone(), RetryPolicy::no_retry()),
        )
        .with_max_attempts(1);

        queue.fail_next(QueueError::Transport("still down".to_string()));
        let first = reconciler.reconcile().await.unwrap();
        assert_eq!(first.failed.len(), 1);
        assert_eq!(first.exhausted, 1);

        let second = reconciler.reconcile().await.unwrap();
        assert!(second.replayed.is_empty());
        assert!(second.failed.is_empty());
        assert_eq!(second.exhausted, 1);
        assert!(queue.sent().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_entry_does_not_block_newer_ones() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(RecordingJobQueue::new());

        let mut stuck = pending_for("wf-old");
        stuck.recorded_at = chrono::Utc::now() - chrono::Duration::minutes(5);
        stuck.attempts = 1;
        store.record(&stuck).await.unwrap();
        let fresh = pending_for("wf-new");
        store.record(&fresh).await.unwrap();

        let reconciler = Reconciler::new(
            store.clone(),
            BoundaryEmitter::new(queue.clone(), RetryPolicy::no_retry()),
        )
        .with_max_attempts(1)
        .with_batch_size(1);

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.replayed, vec![fresh.id]);
        assert_eq!(report.exhausted, 1);

        let sent = queue.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].idempotency_key, fresh.event.idempotency_key);
        assert!(store.pending(10, 1).await.unwrap().is_empty());
        assert_eq!(store.pending(10, u32::MAX).await.unwrap(), vec![stuck]);
    }

    #[tokio::test]
    async fn test_resolve_failure_does_not_abort_the_batch() {
        let first = pending_for("wf-1");
        let second = pending_for("wf-2");
        let entries = vec![first.clone(), second.clone()];
        let (first_id, second_id) = (first.id, second.id);

        let mut log = MockInconsistencyLog::new();
        log.expect_pending()
            .returning(move |_, _| Ok(entries.clone()));
        log.expect_mark_resolved()
            .withf(move |id, _| *id == first_id)
            .times(1)
            .returning(|_, _| Err(StoreError::Unavailable("disk full".to_string())));
        log.expect_mark_resolved()
            .withf(move |id, _| *id == second_id)
            .times(1)
            .returning(|_, _| Ok(()));
        log.expect_exhausted().returning(|_| Ok(0));

        let queue = Arc::new(RecordingJobQueue::new());
        let reconciler = Reconciler::new(
            Arc::new(log),
            BoundaryEmitter::new(queue.clone(), RetryPolicy::no_retry()),
        );

        let report = reconciler.reconcile().await.unwrap();
        assert_eq!(report.replayed, vec![second_id]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, first_id);
        assert!(report.failed[0].1.contains("not marked resolved"));
        assert_eq!(queue.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_unconfigured_queue_defers_event_for_reconciliation() {
        let store = Arc::new(InMemoryStore::new());
        let engine = TransitionEngine::new(
            store.clone(),
            BoundaryEmitter::new(Arc::new(DeferredJobQueue), RetryPolicy::no_retry()),
        )
        .with_inconsistency_log(store.clone());
        let record = seeded(&store, WorkflowState::Step3Seeds).await;

        let outcome = engine
            .transition(&record.id, &record.organization_id, WorkflowEvent::SeedsApproved, &actor())
            .await
            .unwrap();
        let applied = outcome.applied().unwrap();
        assert_eq!(applied.to, WorkflowState::Step4Longtails);
        assert!(applied.emitted.is_none());
        let deferred = applied.deferred.clone().unwrap();
        assert_eq!(deferred.name, LONGTAIL_EXPANSION_EVENT);

        // Still unconfigured: the entry stays put and no attempt is spent
        let waiting = Reconciler::new(
            store.clone(),
            BoundaryEmitter::new(Arc::new(DeferredJobQueue), RetryPolicy::no_retry()),
        )
        .with_max_attempts(1);
        let report = waiting.reconcile().await.unwrap();
        assert_eq!(report.deferred.len(), 1);
        assert!(report.failed.is_empty());
        let pending = store.pending(10, 1).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 0);

        let queue = Arc::new(RecordingJobQueue::new());
        let configured = Reconciler::new(
            store.clone(),
            BoundaryEmitter::new(queue.clone(), RetryPolicy::no_retry()),
        );
        let report = configured.reconcile().await.unwrap();
        assert_eq!(report.replayed, vec![pending[0].id]);
        assert_eq!(queue.sent()[0].idempotency_key, deferred.idempotency_key);
    }

    #[tokio::test]
    async fn test_deferred_event_without_log_is_an_inconsistency() {
        let store = Arc::new(InMemoryStore::new());
        let engine = TransitionEngine::new(
            store.clone(),
            BoundaryEmitter::new(Arc::new(DeferredJobQueue), RetryPolicy::no_retry()),
        );
        let record = seeded(&store, WorkflowState::Step8Subtopics).await;

        let err = engine
            .transition(
                &record.id,
                &record.organization_id,
                WorkflowEvent::SubtopicsApproved,
                &actor(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::EmissionInconsistency { .. }));
        assert_eq!(state_of(&store, &record).await, WorkflowState::Step9Articles);
    }
}
