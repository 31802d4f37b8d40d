//! Direct handover and create-and-handover flows

mod common;

use common::*;
use handover::clock::Clock;
use handover::error::HandoverError;
use handover::handover::{Authority, HandoverEvent};
use handover::models::{ApprovalStatus, Role, UserRole};

#[tokio::test]
async fn test_first_assignment_records_null_origin() {
    let h = harness().await;
    let dean = insert_user(h.store(), "dean@example.edu", UserRole::Active(Role::Dean)).await;

    let outcome = h.service.handover_role(Role::Dean, dean.id, Authority::Operator(None), None).await.unwrap();

    assert_eq!(outcome.from_user_id, None);
    assert_eq!(outcome.to_user_id, dean.id);
    assert_eq!(outcome.reassigned, 0);

    let slot = h.store().role_slot(Role::Dean).await.unwrap().unwrap();
    assert_eq!(slot.holder_id, dean.id);
    assert_eq!(slot.assumed_at, h.clock.now());

    let history = h.store().history_for(Role::Dean).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_user_id, None);
    assert_eq!(history[0].to_user_id, dean.id);
    assert_eq!(history[0].performed_by, None);
}

#[tokio::test]
async fn test_replacement_with_pending_work() {
    let h = harness().await;
    let old = seat_holder(&h, "old.dean@example.edu", Role::Dean).await;
    let new = insert_user(h.store(), "new.dean@example.edu", UserRole::Active(Role::Dean)).await;

    for _ in 0..3 {
        insert_approval(h.store(), Role::Dean, Some(old.id), ApprovalStatus::Pending).await;
    }

    let outcome = h
        .service
        .handover_role(Role::Dean, new.id, Authority::Holder(old.id), Some("retirement".to_string()))
        .await
        .unwrap();

    assert_eq!(outcome.from_user_id, Some(old.id));
    assert_eq!(outcome.to_user_id, new.id);
    assert_eq!(outcome.reassigned, 3);

    let old = h.store().find_user(old.id).await.unwrap().unwrap();
    assert_eq!(old.role, UserRole::Inactive(Role::Dean));
    assert_eq!(old.role.to_db(), "inactive_dean");

    assert!(h.store().is_current_holder(Role::Dean, new.id).await.unwrap());
    assert!(!h.store().is_current_holder(Role::Dean, old.id).await.unwrap());

    let awaiting = h.store().awaiting_for(Role::Dean).await.unwrap();
    assert_eq!(awaiting.len(), 3);
    assert!(awaiting.iter().all(|a| a.approver_id == Some(new.id)));

    let record = &h.store().history_for(Role::Dean).await.unwrap()[0];
    assert_eq!(record.from_user_id, Some(old.id));
    assert_eq!(record.to_user_id, new.id);
    assert_eq!(record.performed_by, Some(old.id));
    assert_eq!(record.reason.as_deref(), Some("retirement"));
}

#[tokio::test]
async fn test_reassignment_is_filtered() {
    let h = harness().await;
    let old = seat_holder(&h, "old@example.edu", Role::Dean).await;
    let new = insert_user(h.store(), "new@example.edu", UserRole::Active(Role::Dean)).await;
    let bystander = insert_user(h.store(), "other@example.edu", UserRole::Active(Role::AssociateDean)).await;

    let mine = insert_approval(h.store(), Role::Dean, Some(old.id), ApprovalStatus::Pending).await;
    let unassigned = insert_approval(h.store(), Role::Dean, None, ApprovalStatus::Pending).await;
    let decided = insert_approval(h.store(), Role::Dean, Some(old.id), ApprovalStatus::Approved).await;
    let returned = insert_approval(h.store(), Role::Dean, Some(old.id), ApprovalStatus::Returned).await;
    let other_role =
        insert_approval(h.store(), Role::AssociateDean, Some(bystander.id), ApprovalStatus::Pending).await;
    let other_unassigned = insert_approval(h.store(), Role::AssociateDean, None, ApprovalStatus::Pending).await;

    let outcome = h.service.handover_role(Role::Dean, new.id, Authority::Operator(None), None).await.unwrap();
    assert_eq!(outcome.reassigned, 2);

    let approver = |id: i64| {
        let pool = h.store().pool().clone();
        async move {
            sqlx::query_scalar::<_, Option<i64>>("SELECT approver_id FROM pending_approvals WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap()
        }
    };

    assert_eq!(approver(mine).await, Some(new.id));
    assert_eq!(approver(unassigned).await, Some(new.id));
    assert_eq!(approver(decided).await, Some(old.id));
    assert_eq!(approver(returned).await, Some(old.id));
    assert_eq!(approver(other_role).await, Some(bystander.id));
    assert_eq!(approver(other_unassigned).await, None);
}

#[tokio::test]
async fn test_first_holder_only_claims_unassigned_work() {
    let h = harness().await;
    let stray = insert_user(h.store(), "stray@example.edu", UserRole::Other("faculty".into())).await;
    let dean = insert_user(h.store(), "dean@example.edu", UserRole::Active(Role::Dean)).await;

    insert_approval(h.store(), Role::Dean, None, ApprovalStatus::Pending).await;
    insert_approval(h.store(), Role::Dean, None, ApprovalStatus::Pending).await;
    insert_approval(h.store(), Role::Dean, Some(stray.id), ApprovalStatus::Pending).await;

    let outcome = h.service.handover_role(Role::Dean, dean.id, Authority::Operator(None), None).await.unwrap();
    assert_eq!(outcome.reassigned, 2);
}

#[tokio::test]
async fn test_role_mismatch_performs_no_mutation() {
    let h = harness().await;
    let dean = seat_holder(&h, "dean@example.edu", Role::Dean).await;
    let faculty = insert_user(h.store(), "prof@example.edu", UserRole::Other("faculty".into())).await;
    let former = insert_user(h.store(), "former@example.edu", UserRole::Inactive(Role::Dean)).await;
    let associate = insert_user(h.store(), "assoc@example.edu", UserRole::Active(Role::AssociateDean)).await;
    insert_approval(h.store(), Role::Dean, Some(dean.id), ApprovalStatus::Pending).await;
    insert_approval(h.store(), Role::Dean, None, ApprovalStatus::Pending).await;

    let before = table_counts(h.store()).await;
    let awaiting_before = h.store().awaiting_for(Role::Dean).await.unwrap();

    for candidate in [faculty.id, former.id, associate.id] {
        let result = h.service.handover_role(Role::Dean, candidate, Authority::Holder(dean.id), None).await;
        match result {
            Err(HandoverError::RoleMismatch { user_id, role }) => {
                assert_eq!(user_id, candidate);
                assert_eq!(role, Role::Dean);
            }
            other => panic!("Expected RoleMismatch, got {:?}", other.map(|o| o.record.id)),
        }
    }

    assert_eq!(table_counts(h.store()).await, before);
    assert_eq!(h.store().awaiting_for(Role::Dean).await.unwrap(), awaiting_before);
    assert!(h.store().is_current_holder(Role::Dean, dean.id).await.unwrap());
    let dean = h.store().find_user(dean.id).await.unwrap().unwrap();
    assert_eq!(dean.role, UserRole::Active(Role::Dean));
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let h = harness().await;
    let result = h.service.handover_role(Role::AdminAssistant, 404, Authority::Operator(None), None).await;
    assert!(matches!(result, Err(HandoverError::UserNotFound(404))));
    assert!(h.store().role_slot(Role::AdminAssistant).await.unwrap().is_none());
}

#[tokio::test]
async fn test_audit_failure_rolls_back_everything() {
    let h = harness().await;
    let old = seat_holder(&h, "old@example.edu", Role::Dean).await;
    let new = insert_user(h.store(), "new@example.edu", UserRole::Active(Role::Dean)).await;
    insert_approval(h.store(), Role::Dean, Some(old.id), ApprovalStatus::Pending).await;

    // Abort the audit insert, which runs after the ledger update
    sqlx::query(
        r#"
        CREATE TRIGGER inject_audit_fault BEFORE INSERT ON handover_records
        BEGIN
            SELECT RAISE(ABORT, 'injected fault');
        END;
        "#,
    )
    .execute(h.store().pool())
    .await
    .unwrap();

    let result = h.service.handover_role(Role::Dean, new.id, Authority::Holder(old.id), None).await;
    let err = result.unwrap_err();
    assert!(matches!(err, HandoverError::Database(_)));
    assert!(err.is_retryable());

    assert!(h.store().is_current_holder(Role::Dean, old.id).await.unwrap());
    let old_user = h.store().find_user(old.id).await.unwrap().unwrap();
    assert_eq!(old_user.role, UserRole::Active(Role::Dean));
    let awaiting = h.store().awaiting_for(Role::Dean).await.unwrap();
    assert_eq!(awaiting[0].approver_id, Some(old.id));
    assert_eq!(h.store().history_for(Role::Dean).await.unwrap().len(), 1);

    // Retrying from scratch succeeds once the fault is gone
    sqlx::query("DROP TRIGGER inject_audit_fault")
        .execute(h.store().pool())
        .await
        .unwrap();

    let outcome = h.service.handover_role(Role::Dean, new.id, Authority::Holder(old.id), None).await.unwrap();
    assert_eq!(outcome.reassigned, 1);
    assert!(h.store().is_current_holder(Role::Dean, new.id).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_handovers_serialize_per_role() {
    let h = harness().await;
    let first = seat_holder(&h, "first@example.edu", Role::Dean).await;
    let a = insert_user(h.store(), "a@example.edu", UserRole::Active(Role::Dean)).await;
    let b = insert_user(h.store(), "b@example.edu", UserRole::Active(Role::Dean)).await;
    let assistant = insert_user(h.store(), "aa@example.edu", UserRole::Active(Role::AdminAssistant)).await;
    for _ in 0..4 {
        insert_approval(h.store(), Role::Dean, Some(first.id), ApprovalStatus::Pending).await;
    }

    let (ra, rb, rc) = tokio::join!(
        h.service.handover_role(Role::Dean, a.id, Authority::Operator(None), None),
        h.service.handover_role(Role::Dean, b.id, Authority::Operator(None), None),
        h.service.handover_role(Role::AdminAssistant, assistant.id, Authority::Operator(None), None),
    );
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    rc.unwrap();

    // One of them replaced the original holder, the other replaced the winner
    let (earlier, later) = if ra.record.id < rb.record.id { (ra, rb) } else { (rb, ra) };
    assert_eq!(earlier.from_user_id, Some(first.id));
    assert_eq!(later.from_user_id, Some(earlier.to_user_id));
    assert_eq!(earlier.reassigned, 4);
    assert_eq!(later.reassigned, 4);

    let holder = h.store().current_holder(Role::Dean).await.unwrap().unwrap();
    assert_eq!(holder.id, later.to_user_id);

    // Exactly one active holder attribute remains among the candidates
    let mut active = 0;
    for id in [first.id, a.id, b.id] {
        let user = h.store().find_user(id).await.unwrap().unwrap();
        if user.role.is_active(Role::Dean) && id != later.to_user_id {
            panic!("User {} still carries the active dean attribute", id);
        }
        if user.role.is_active(Role::Dean) {
            active += 1;
        }
    }
    assert_eq!(active, 1);

    let awaiting = h.store().awaiting_for(Role::Dean).await.unwrap();
    assert!(awaiting.iter().all(|a| a.approver_id == Some(later.to_user_id)));
    assert!(h.store().is_current_holder(Role::AdminAssistant, assistant.id).await.unwrap());
}

#[tokio::test]
async fn test_holder_authority_ends_at_first_handover() {
    let h = harness().await;
    let dean = seat_holder(&h, "dean@example.edu", Role::Dean).await;
    let b = insert_user(h.store(), "b@example.edu", UserRole::Active(Role::Dean)).await;
    let c = insert_user(h.store(), "c@example.edu", UserRole::Active(Role::Dean)).await;
    insert_approval(h.store(), Role::Dean, Some(dean.id), ApprovalStatus::Pending).await;

    let (rb, rc) = tokio::join!(
        h.service.handover_role(Role::Dean, b.id, Authority::Holder(dean.id), None),
        h.service.handover_role(Role::Dean, c.id, Authority::Holder(dean.id), None),
    );

    let (winner, loser) = match (rb, rc) {
        (Ok(outcome), Err(e)) | (Err(e), Ok(outcome)) => (outcome, e),
        (rb, rc) => panic!("Expected exactly one handover, got {:?} and {:?}", rb.is_ok(), rc.is_ok()),
    };
    assert!(matches!(loser, HandoverError::NotAuthorized(_)));
    assert_eq!(winner.from_user_id, Some(dean.id));

    let history = h.store().history_for(Role::Dean).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].performed_by, Some(dean.id));
    assert_eq!(history[0].to_user_id, winner.to_user_id);
    assert!(h.store().is_current_holder(Role::Dean, winner.to_user_id).await.unwrap());

    // The new holder keeps the active attribute and the reassigned work
    let holder = h.store().find_user(winner.to_user_id).await.unwrap().unwrap();
    assert_eq!(holder.role, UserRole::Active(Role::Dean));
    let awaiting = h.store().awaiting_for(Role::Dean).await.unwrap();
    assert_eq!(awaiting[0].approver_id, Some(winner.to_user_id));
}

#[tokio::test]
async fn test_handover_to_current_holder_keeps_attribute() {
    let h = harness().await;
    let dean = seat_holder(&h, "dean@example.edu", Role::Dean).await;

    let outcome = h
        .service
        .handover_role(Role::Dean, dean.id, Authority::Holder(dean.id), Some("reconfirm".into()))
        .await
        .unwrap();
    assert_eq!(outcome.from_user_id, Some(dean.id));

    let dean = h.store().find_user(dean.id).await.unwrap().unwrap();
    assert_eq!(dean.role, UserRole::Active(Role::Dean));
    assert_eq!(h.store().history_for(Role::Dean).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_create_and_handover() {
    let h = harness().await;
    let old = seat_holder(&h, "old.aa@example.edu", Role::AdminAssistant).await;
    insert_approval(h.store(), Role::AdminAssistant, Some(old.id), ApprovalStatus::Pending).await;

    let (user, outcome) = h
        .service
        .create_and_handover(
            Role::AdminAssistant,
            profile("  New.AA@Example.edu "),
            Authority::Holder(old.id),
            Some("reassignment".into()),
        )
        .await
        .unwrap();

    assert_eq!(user.email, "new.aa@example.edu");
    assert_eq!(user.role, UserRole::Active(Role::AdminAssistant));
    assert!(user.email_verified_at.is_some());
    assert_eq!(outcome.from_user_id, Some(old.id));
    assert_eq!(outcome.reassigned, 1);

    let credential: String = sqlx::query_scalar("SELECT credential FROM users WHERE id = ?")
        .bind(user.id)
        .fetch_one(h.store().pool())
        .await
        .unwrap();
    assert!(credential.starts_with('!'));

    let old = h.store().find_user(old.id).await.unwrap().unwrap();
    assert_eq!(old.role, UserRole::Inactive(Role::AdminAssistant));
}

#[tokio::test]
async fn test_create_and_handover_rejects_existing_email() {
    let h = harness().await;
    seat_holder(&h, "dean@example.edu", Role::Dean).await;
    let before = table_counts(h.store()).await;

    let result = h
        .service
        .create_and_handover(Role::Dean, profile("DEAN@example.edu"), Authority::Operator(None), None)
        .await;
    assert!(matches!(result, Err(HandoverError::EmailAlreadyRegistered)));
    assert_eq!(table_counts(h.store()).await, before);
}

#[tokio::test]
async fn test_transfer_event_published_after_commit() {
    let h = harness().await;
    let mut events = h.service.subscribe();
    let dean = insert_user(h.store(), "dean@example.edu", UserRole::Active(Role::Dean)).await;
    let faculty = insert_user(h.store(), "prof@example.edu", UserRole::Other("faculty".into())).await;

    let _ = h.service.handover_role(Role::Dean, faculty.id, Authority::Operator(None), None).await;
    assert!(events.try_recv().is_err());

    let outcome = h.service.handover_role(Role::Dean, dean.id, Authority::Operator(None), None).await.unwrap();
    assert_eq!(
        events.try_recv().unwrap(),
        HandoverEvent::RoleTransferred {
            role: Role::Dean,
            from_user_id: None,
            to_user_id: dean.id,
            reassigned: 0,
            record_id: outcome.record.id,
        }
    );
}

#[tokio::test]
async fn test_history_is_most_recent_first() {
    let h = harness().await;
    let mut ids = Vec::new();
    for i in 0..3 {
        let user = insert_user(h.store(), &format!("dean{}@example.edu", i), UserRole::Active(Role::Dean)).await;
        h.clock.advance(chrono::Duration::days(1));
        ids.push(h.service.handover_role(Role::Dean, user.id, Authority::Operator(None), None).await.unwrap().record.id);
    }

    let history = h.store().history_for(Role::Dean).await.unwrap();
    let listed: Vec<_> = history.iter().map(|r| r.id).collect();
    ids.reverse();
    assert_eq!(listed, ids);
    assert_eq!(h.store().latest_for(Role::Dean).await.unwrap(), Some(ids[0]));
    assert!(h.store().history_for(Role::AssociateDean).await.unwrap().is_empty());
}
