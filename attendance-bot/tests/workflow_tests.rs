//! End-to-end tests of the attendance workflow through the dispatcher
//!
//! Covers session management, check-in, evidence escalation, adjudication,
//! role assignment and statistics against an in-memory database.

mod common;

use attendance_bot::dispatch::{Command, Principal, ReplyKind};
use attendance_bot::gateway::EvidenceArtifact;
use attendance_bot::services::{
    CheckInEngine, CheckInError, CheckInRequest, Decision, ReviewCoordinator, ReviewError, RoleAuthority,
};
use attendance_common::db::{AttendanceStatus, Role};
use attendance_common::events::AttendanceEvent;
use common::{harness, Harness, MASTER, REVIEW_CHAT};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const STUDENT: i64 = 1;
const SPEAKER: i64 = 2;
const REVIEWER: i64 = 3;

const HALL_LAT: f64 = 55.7558;
const HALL_LON: f64 = 37.6173;

/// Master admin promotes the standard cast
async fn with_roles(h: &Harness) {
    for (target, role) in [(SPEAKER, "speaker"), (REVIEWER, "rating")] {
        let reply = h
            .webapp(MASTER, json!({"type": "admin_set_role", "targetUserId": target.to_string(), "newRole": role}))
            .await
            .unwrap();
        assert_eq!(reply.kind, ReplyKind::Done, "{:?}", reply);
    }
}

/// Speaker opens a fenced lecture
async fn open_fenced_lecture(h: &Harness, lecture_id: &str) {
    let reply = h
        .webapp(SPEAKER, json!({"type": "speaker_open_lecture", "lectureId": lecture_id}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Done);

    let reply = h
        .webapp(
            SPEAKER,
            json!({"type": "speaker_set_geo", "lectureId": lecture_id, "lat": HALL_LAT, "lon": HALL_LON, "accuracy": 10}),
        )
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Done);
}

async fn check_in_at(h: &Harness, user_id: i64, lecture_id: &str, lat: f64, lon: f64) -> attendance_bot::dispatch::Reply {
    h.webapp(
        user_id,
        json!({
            "type": "checkin",
            "fio": "Ivanov Ivan",
            "email": "ivan@example.com",
            "lastGeo": {"latitude": lat, "longitude": lon, "accuracy": 15.0},
            "lectureId": lecture_id,
            "device": "test-phone"
        }),
    )
    .await
    .unwrap()
}

async fn set_review_chat(h: &Harness) {
    let reply = h
        .dispatcher
        .handle_command(&Principal::new(MASTER), Command::SetReviewChat, REVIEW_CHAT)
        .await;
    assert_eq!(reply.kind, ReplyKind::Done);
}

/// Escalate a student's check-in and attach evidence; returns the attendance id
async fn escalate_with_evidence(h: &Harness, lecture_id: &str) -> i64 {
    let reply = check_in_at(h, STUDENT, lecture_id, 55.80, 37.60).await;
    assert_eq!(reply.kind, ReplyKind::Escalated);

    let reply = h
        .dispatcher
        .handle_evidence(&Principal::new(STUDENT), &EvidenceArtifact { file_id: "video-1".to_string() })
        .await;
    assert_eq!(reply.kind, ReplyKind::Done, "{:?}", reply);

    let record = h.attendance_for(STUDENT, lecture_id).await.unwrap();
    assert_eq!(record.status, AttendanceStatus::Pending);
    record.id
}

// =============================================================================
// Session management
// =============================================================================

#[tokio::test]
async fn test_end_to_end_example() {
    let h = harness().await;
    with_roles(&h).await;

    // Student cannot open: denied, no row
    let reply = h
        .webapp(STUDENT, json!({"type": "speaker_open_lecture", "lectureId": "math101"}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Denied);
    assert_eq!(h.lecture_rows("math101").await, 0);

    open_fenced_lecture(&h, "math101").await;
    let lecture = attendance_bot::db::lectures::get_lecture(&h.pool, "math101")
        .await
        .unwrap()
        .unwrap();
    assert!(lecture.is_open);
    assert_eq!(lecture.geofence.map(|g| g.radius_m), Some(150.0));

    let reply = check_in_at(&h, STUDENT, "math101", HALL_LAT, HALL_LON).await;
    assert_eq!(reply.kind, ReplyKind::Done);
    let data = reply.data.unwrap();
    assert_eq!(data["status"], "approved");
    assert_eq!(data["distanceM"].as_f64(), Some(0.0));

    let reply = check_in_at(&h, STUDENT, "math101", HALL_LAT, HALL_LON).await;
    assert_eq!(reply.kind, ReplyKind::Conflict);
    assert_eq!(h.attendance_count().await, 1);
}

#[tokio::test]
async fn test_open_is_idempotent() {
    let h = harness().await;
    with_roles(&h).await;

    h.webapp(SPEAKER, json!({"type": "speaker_open_lecture", "lectureId": "math101"}))
        .await
        .unwrap();
    let first = attendance_bot::db::lectures::get_lecture(&h.pool, "math101")
        .await
        .unwrap()
        .unwrap();

    let reply = h
        .webapp(SPEAKER, json!({"type": "speaker_open_lecture", "lectureId": "math101"}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Done);

    let second = attendance_bot::db::lectures::get_lecture(&h.pool, "math101")
        .await
        .unwrap()
        .unwrap();
    assert!(second.is_open);
    assert!(second.opened_at >= first.opened_at);
    assert_eq!(h.lecture_rows("math101").await, 1);
}

#[tokio::test]
async fn test_student_cannot_close_or_fence() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;

    let reply = h
        .webapp(STUDENT, json!({"type": "speaker_close_lecture", "lectureId": "math101"}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Denied);

    let reply = h
        .webapp(STUDENT, json!({"type": "speaker_set_geo", "lectureId": "math101", "lat": 0.0, "lon": 0.0}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Denied);

    let lecture = attendance_bot::db::lectures::get_lecture(&h.pool, "math101")
        .await
        .unwrap()
        .unwrap();
    assert!(lecture.is_open);
    assert_eq!(lecture.geofence.map(|g| g.lat), Some(HALL_LAT));
}

#[tokio::test]
async fn test_declared_role_is_not_trusted() {
    let h = harness().await;

    let reply = h
        .webapp(STUDENT, json!({"type": "speaker_open_lecture", "lectureId": "math101", "role": "admin"}))
        .await
        .unwrap();

    assert_eq!(reply.kind, ReplyKind::Denied);
    assert_eq!(h.lecture_rows("math101").await, 0);
}

#[tokio::test]
async fn test_close_blocks_check_in() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;

    let reply = h
        .webapp(SPEAKER, json!({"type": "speaker_close_lecture", "lecture_id": "math101"}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Done);

    let reply = check_in_at(&h, STUDENT, "math101", HALL_LAT, HALL_LON).await;
    assert_eq!(reply.kind, ReplyKind::Conflict);
    assert_eq!(h.attendance_count().await, 0);
}

#[tokio::test]
async fn test_qr_scan_registers_closed_lecture() {
    let h = harness().await;

    let reply = h.webapp(STUDENT, json!({"type": "qr_scan", "qr": "bio-7"})).await.unwrap();
    assert_eq!(reply.kind, ReplyKind::Done);

    let reply = check_in_at(&h, STUDENT, "bio-7", HALL_LAT, HALL_LON).await;
    assert_eq!(reply.kind, ReplyKind::Conflict, "scanned lecture is not open");

    let reply = h.webapp(STUDENT, json!({"type": "qr_scan", "qr": "  "})).await.unwrap();
    assert_eq!(reply.kind, ReplyKind::Invalid);
}

// =============================================================================
// Check-in
// =============================================================================

#[tokio::test]
async fn test_unfenced_lecture_always_approves() {
    let h = harness().await;
    with_roles(&h).await;
    h.webapp(SPEAKER, json!({"type": "speaker_open_lecture", "lectureId": "open-air"}))
        .await
        .unwrap();

    // Far away and without coordinates both pass
    let reply = check_in_at(&h, STUDENT, "open-air", -33.8688, 151.2093).await;
    assert_eq!(reply.kind, ReplyKind::Done);

    let reply = h
        .webapp(4, json!({"type": "checkin", "lectureId": "open-air"}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Done);
    assert_eq!(
        h.attendance_for(4, "open-air").await.unwrap().status,
        AttendanceStatus::Approved
    );
}

#[tokio::test]
async fn test_unregistered_lecture_and_missing_id() {
    let h = harness().await;

    let reply = check_in_at(&h, STUDENT, "ghost", HALL_LAT, HALL_LON).await;
    assert_eq!(reply.kind, ReplyKind::Conflict);

    let reply = h.webapp(STUDENT, json!({"type": "checkin"})).await.unwrap();
    assert_eq!(reply.kind, ReplyKind::Invalid);

    let reply = check_in_at(&h, STUDENT, "ghost", 123.0, HALL_LON).await;
    assert_eq!(reply.kind, ReplyKind::Invalid);

    assert_eq!(h.attendance_count().await, 0);
}

#[tokio::test]
async fn test_out_of_range_check_in_still_saves_profile() {
    let h = harness().await;

    let reply = h
        .webapp(
            42,
            json!({
                "type": "checkin",
                "fio": "Ivanov",
                "email": "ivanov@example.com",
                "lastGeo": {"latitude": 95.0, "longitude": 10.0},
                "lectureId": "zzz"
            }),
        )
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Invalid);

    let user = attendance_bot::db::users::get_user(&h.pool, 42).await.unwrap().unwrap();
    assert_eq!(user.fio.as_deref(), Some("Ivanov"));
    assert_eq!(user.email.as_deref(), Some("ivanov@example.com"));
    assert_eq!(h.attendance_count().await, 0);
}

#[tokio::test]
async fn test_check_in_stores_profile_and_snapshot() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;

    check_in_at(&h, STUDENT, "math101", HALL_LAT, HALL_LON).await;

    let user = attendance_bot::db::users::get_user(&h.pool, STUDENT).await.unwrap().unwrap();
    assert_eq!(user.fio.as_deref(), Some("Ivanov Ivan"));
    assert_eq!(user.email.as_deref(), Some("ivan@example.com"));

    let record = h.attendance_for(STUDENT, "math101").await.unwrap();
    assert_eq!(record.device.as_deref(), Some("test-phone"));
    assert_eq!(record.geo_accuracy, Some(15.0));
    let extra: serde_json::Value = serde_json::from_str(record.extra_json.as_deref().unwrap()).unwrap();
    assert_eq!(extra["raw"]["type"], "checkin");
}

#[tokio::test]
async fn test_repeated_check_ins_keep_single_record() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;

    let first = check_in_at(&h, STUDENT, "math101", 55.80, 37.60).await;
    assert_eq!(first.kind, ReplyKind::Escalated);

    for (lat, lon) in [(HALL_LAT, HALL_LON), (55.80, 37.60), (HALL_LAT, HALL_LON)] {
        let reply = check_in_at(&h, STUDENT, "math101", lat, lon).await;
        assert_eq!(reply.kind, ReplyKind::Conflict);
    }

    assert_eq!(h.attendance_count().await, 1);
    assert_eq!(
        h.attendance_for(STUDENT, "math101").await.unwrap().status,
        AttendanceStatus::PendingVideo
    );
}

#[tokio::test]
async fn test_concurrent_check_ins_create_one_record() {
    let h = harness().await;
    attendance_bot::db::lectures::open_lecture(&h.pool, "math101", SPEAKER, chrono::Utc::now())
        .await
        .unwrap();
    let engine = CheckInEngine::new(h.pool.clone(), h.event_bus.clone());

    let attempts = (0..8).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .check_in(CheckInRequest {
                    user_id: STUDENT,
                    lecture_id: "math101".to_string(),
                    ..Default::default()
                })
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;

    let mut created = 0;
    let mut duplicates = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => created += 1,
            Err(CheckInError::DuplicateCheckIn(_)) => duplicates += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(h.attendance_count().await, 1);
}

#[tokio::test]
async fn test_check_in_event_published() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;
    let mut rx = h.event_bus.subscribe();

    check_in_at(&h, STUDENT, "math101", HALL_LAT, HALL_LON).await;

    match rx.recv().await.unwrap() {
        AttendanceEvent::CheckInRecorded { user_id, lecture_id, status, .. } => {
            assert_eq!(user_id, STUDENT);
            assert_eq!(lecture_id, "math101");
            assert_eq!(status, AttendanceStatus::Approved);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

// =============================================================================
// Evidence and review
// =============================================================================

#[tokio::test]
async fn test_escalation_evidence_and_approval() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;
    set_review_chat(&h).await;

    let attendance_id = escalate_with_evidence(&h, "math101").await;

    let forwarded = h.gateway.forwarded();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].chat_id, REVIEW_CHAT);
    assert_eq!(forwarded[0].file_id, "video-1");
    assert_eq!(
        forwarded[0].controls,
        vec![
            format!("verify_att:{}:ok", attendance_id),
            format!("verify_att:{}:reject", attendance_id)
        ]
    );
    let record = h.attendance_for(STUDENT, "math101").await.unwrap();
    assert_eq!(record.evidence.map(|e| (e.chat_id, e.message_id)), Some((REVIEW_CHAT, forwarded[0].message_id)));

    let reply = h
        .dispatcher
        .handle_decision(&Principal::new(REVIEWER), &format!("verify_att:{}:ok", attendance_id))
        .await;
    assert_eq!(reply.kind, ReplyKind::Done);

    let record = h.attendance_for(STUDENT, "math101").await.unwrap();
    assert_eq!(record.status, AttendanceStatus::Approved);
    assert_eq!(record.reviewer_id, Some(REVIEWER));
    assert!(record.reviewed_at.is_some());

    assert_eq!(h.gateway.deleted(), vec![(REVIEW_CHAT, forwarded[0].message_id)]);
    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, STUDENT);
    assert!(sent[0].1.contains("confirmed"));
}

#[tokio::test]
async fn test_rejection_is_terminal_and_allows_new_check_in() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;
    set_review_chat(&h).await;
    let attendance_id = escalate_with_evidence(&h, "math101").await;

    let reply = h
        .dispatcher
        .handle_decision(&Principal::new(REVIEWER), &format!("verify_att:{}:reject", attendance_id))
        .await;
    assert_eq!(reply.kind, ReplyKind::Done);
    assert_eq!(
        h.attendance_for(STUDENT, "math101").await.unwrap().status,
        AttendanceStatus::Rejected
    );
    assert!(h.gateway.sent()[0].1.contains("rejected"));

    // Second decision on a terminal record is refused and changes nothing
    let reply = h
        .dispatcher
        .handle_decision(&Principal::new(REVIEWER), &format!("verify_att:{}:ok", attendance_id))
        .await;
    assert_eq!(reply.kind, ReplyKind::Conflict);
    assert_eq!(
        h.attendance_for(STUDENT, "math101").await.unwrap().status,
        AttendanceStatus::Rejected
    );

    // A rejected record does not block a new attempt
    let reply = check_in_at(&h, STUDENT, "math101", HALL_LAT, HALL_LON).await;
    assert_eq!(reply.kind, ReplyKind::Done);
    let record = h.attendance_for(STUDENT, "math101").await.unwrap();
    assert_eq!(record.status, AttendanceStatus::Approved);
    assert_eq!(record.reviewer_id, None);
    assert_eq!(h.attendance_count().await, 1);
}

#[tokio::test]
async fn test_evidence_without_pending_request() {
    let h = harness().await;
    set_review_chat(&h).await;

    let reply = h
        .dispatcher
        .handle_evidence(&Principal::new(STUDENT), &EvidenceArtifact { file_id: "v".to_string() })
        .await;

    assert_eq!(reply.kind, ReplyKind::Conflict);
    assert!(h.gateway.forwarded().is_empty());
    assert_eq!(h.attendance_count().await, 0);
}

#[tokio::test]
async fn test_evidence_without_review_chat_changes_nothing() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;
    check_in_at(&h, STUDENT, "math101", 55.80, 37.60).await;

    let reply = h
        .dispatcher
        .handle_evidence(&Principal::new(STUDENT), &EvidenceArtifact { file_id: "v".to_string() })
        .await;

    assert_eq!(reply.kind, ReplyKind::Conflict);
    assert!(h.gateway.forwarded().is_empty());
    assert_eq!(
        h.attendance_for(STUDENT, "math101").await.unwrap().status,
        AttendanceStatus::PendingVideo
    );
}

#[tokio::test]
async fn test_evidence_resolves_most_recent_pending_video() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;
    open_fenced_lecture(&h, "phys").await;
    set_review_chat(&h).await;

    check_in_at(&h, STUDENT, "math101", 55.80, 37.60).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    check_in_at(&h, STUDENT, "phys", 55.80, 37.60).await;

    h.dispatcher
        .handle_evidence(&Principal::new(STUDENT), &EvidenceArtifact { file_id: "v1".to_string() })
        .await;
    assert_eq!(h.attendance_for(STUDENT, "phys").await.unwrap().status, AttendanceStatus::Pending);
    assert_eq!(
        h.attendance_for(STUDENT, "math101").await.unwrap().status,
        AttendanceStatus::PendingVideo
    );

    h.dispatcher
        .handle_evidence(&Principal::new(STUDENT), &EvidenceArtifact { file_id: "v2".to_string() })
        .await;
    assert_eq!(h.attendance_for(STUDENT, "math101").await.unwrap().status, AttendanceStatus::Pending);
}

#[tokio::test]
async fn test_student_cannot_adjudicate() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;
    set_review_chat(&h).await;
    let attendance_id = escalate_with_evidence(&h, "math101").await;

    for actor in [STUDENT, SPEAKER] {
        let reply = h
            .dispatcher
            .handle_decision(&Principal::new(actor), &format!("verify_att:{}:ok", attendance_id))
            .await;
        assert_eq!(reply.kind, ReplyKind::Denied);
    }

    assert_eq!(
        h.attendance_for(STUDENT, "math101").await.unwrap().status,
        AttendanceStatus::Pending
    );
    assert!(h.gateway.sent().is_empty());
}

#[tokio::test]
async fn test_malformed_decision_control() {
    let h = harness().await;

    let reply = h
        .dispatcher
        .handle_decision(&Principal::new(MASTER), "verify_att:abc:ok")
        .await;
    assert_eq!(reply.kind, ReplyKind::Invalid);

    let reply = h
        .dispatcher
        .handle_decision(&Principal::new(MASTER), "verify_att:1:maybe")
        .await;
    assert_eq!(reply.kind, ReplyKind::Invalid);
}

#[tokio::test]
async fn test_side_effect_failures_do_not_abort_decision() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;
    set_review_chat(&h).await;
    let attendance_id = escalate_with_evidence(&h, "math101").await;

    h.gateway.fail_deletes.store(true, Ordering::SeqCst);
    h.gateway.fail_sends.store(true, Ordering::SeqCst);

    let reply = h
        .dispatcher
        .handle_decision(&Principal::new(MASTER), &format!("verify_att:{}:ok", attendance_id))
        .await;

    assert_eq!(reply.kind, ReplyKind::Done);
    let record = h.attendance_for(STUDENT, "math101").await.unwrap();
    assert_eq!(record.status, AttendanceStatus::Approved);
    assert_eq!(record.reviewer_id, Some(MASTER));
}

#[tokio::test]
async fn test_adjudication_outcomes() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;
    set_review_chat(&h).await;

    let roles = RoleAuthority::new(h.pool.clone(), HashSet::from([MASTER]), h.event_bus.clone());
    let review = ReviewCoordinator::new(h.pool.clone(), roles, h.gateway.clone(), h.event_bus.clone());

    assert!(matches!(
        review.adjudicate(REVIEWER, 9999, Decision::Approve).await,
        Err(ReviewError::AttendanceNotFound(9999))
    ));

    // Still waiting for video: nothing to review
    let reply = check_in_at(&h, STUDENT, "math101", 55.80, 37.60).await;
    assert_eq!(reply.kind, ReplyKind::Escalated);
    let pending_video = h.attendance_for(STUDENT, "math101").await.unwrap();
    assert!(matches!(
        review.adjudicate(REVIEWER, pending_video.id, Decision::Approve).await,
        Err(ReviewError::NotAwaitingReview { status: AttendanceStatus::PendingVideo, .. })
    ));

    let attached = review
        .attach_evidence(STUDENT, &EvidenceArtifact { file_id: "v".to_string() })
        .await
        .unwrap();
    assert_eq!(attached.attendance_id, pending_video.id);

    let adjudication = review
        .adjudicate(REVIEWER, pending_video.id, Decision::Approve)
        .await
        .unwrap();
    assert_eq!(adjudication.user_id, STUDENT);
    assert_eq!(adjudication.outcome, AttendanceStatus::Approved);

    assert!(matches!(
        review.adjudicate(REVIEWER, pending_video.id, Decision::Reject).await,
        Err(ReviewError::AlreadyAdjudicated { status: AttendanceStatus::Approved, .. })
    ));
    assert!(matches!(
        review.adjudicate(STUDENT, pending_video.id, Decision::Reject).await,
        Err(ReviewError::Denied(_))
    ));
}

#[tokio::test]
async fn test_review_works_with_shared_gateway_handle() {
    // The coordinator only needs the trait object
    let h = harness().await;
    let gateway: Arc<dyn attendance_bot::gateway::ChatGateway> = h.gateway.clone();
    let roles = RoleAuthority::new(h.pool.clone(), HashSet::new(), h.event_bus.clone());
    let review = ReviewCoordinator::new(h.pool.clone(), roles, gateway, h.event_bus.clone());

    assert!(matches!(
        review.attach_evidence(STUDENT, &EvidenceArtifact { file_id: "v".to_string() }).await,
        Err(ReviewError::ReviewChatNotConfigured)
    ));
}

// =============================================================================
// Roles, statistics, commands
// =============================================================================

#[tokio::test]
async fn test_role_assignment_rules() {
    let h = harness().await;
    attendance_bot::db::users::set_role(&h.pool, 5, Role::Admin).await.unwrap();

    // Stored admin is not a master admin
    let reply = h
        .webapp(5, json!({"type": "admin_set_role", "targetUserId": "7", "newRole": "speaker"}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Denied);
    assert_eq!(h.dispatcher.roles().role_of(7).await.unwrap(), Role::Student);

    let reply = h
        .webapp(MASTER, json!({"type": "admin_set_role", "targetUserId": "7", "newRole": "Rating"}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Done);
    assert_eq!(h.dispatcher.roles().role_of(7).await.unwrap(), Role::Rating);

    let reply = h
        .webapp(MASTER, json!({"type": "admin_set_role", "targetUserId": "abc", "newRole": "admin"}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Invalid);

    let reply = h
        .webapp(MASTER, json!({"type": "admin_set_role", "targetUserId": 7, "newRole": "superuser"}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Invalid);
    assert_eq!(h.dispatcher.roles().role_of(7).await.unwrap(), Role::Rating);
}

#[tokio::test]
async fn test_statistics() {
    let h = harness().await;
    with_roles(&h).await;
    open_fenced_lecture(&h, "math101").await;

    let reply = h
        .webapp(MASTER, json!({"type": "admin_request_stats", "lectureId": "math101"}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Done);
    assert!(reply.text.contains("no records yet"));

    check_in_at(&h, STUDENT, "math101", HALL_LAT, HALL_LON).await;
    check_in_at(&h, 4, "math101", 55.80, 37.60).await;

    let reply = h
        .webapp(MASTER, json!({"type": "admin_request_stats", "lectureId": "math101"}))
        .await
        .unwrap();
    let data = reply.data.unwrap();
    assert_eq!(data["total"], 2);
    assert_eq!(data["approved"], 1);
    assert_eq!(data["pending_video"], 1);
    assert_eq!(data["pending"], 0);
    assert_eq!(data["rejected"], 0);

    let reply = h
        .webapp(SPEAKER, json!({"type": "admin_request_stats", "lectureId": "math101"}))
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Denied);
}

#[tokio::test]
async fn test_unknown_malformed_and_advisory_payloads() {
    let h = harness().await;

    let reply = h.webapp(STUDENT, json!({"type": "teleport"})).await.unwrap();
    assert_eq!(reply.kind, ReplyKind::UnknownEvent);
    assert!(reply.text.contains("teleport"));

    let reply = h
        .dispatcher
        .handle_webapp_data(&Principal::new(STUDENT), "{broken")
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Malformed);

    assert!(h
        .webapp(STUDENT, json!({"type": "geo_stream", "lat": 1.0, "lon": 2.0, "accuracy": 5}))
        .await
        .is_none());
    assert!(h.webapp(STUDENT, json!({"type": "geo_stream"})).await.is_none());

    assert_eq!(h.attendance_count().await, 0);
    assert_eq!(h.lecture_rows("teleport").await, 0);
}

#[tokio::test]
async fn test_register_updates_profile() {
    let h = harness().await;

    let reply = h
        .dispatcher
        .handle_webapp_data(
            &Principal {
                id: STUDENT,
                first_name: Some("Ivan".to_string()),
                last_name: None,
                username: Some("ivan".to_string()),
            },
            &json!({"type": "register", "fio": "Ivanov Ivan", "email": "ivan@example.com"}).to_string(),
        )
        .await
        .unwrap();
    assert_eq!(reply.kind, ReplyKind::Done);

    let user = attendance_bot::db::users::get_user(&h.pool, STUDENT).await.unwrap().unwrap();
    assert_eq!(user.fio.as_deref(), Some("Ivanov Ivan"));
    assert_eq!(user.username.as_deref(), Some("ivan"));
    assert_eq!(user.role, Role::Student);
}

#[tokio::test]
async fn test_commands() {
    let h = harness().await;
    with_roles(&h).await;

    let reply = h
        .dispatcher
        .handle_command(&Principal::new(SPEAKER), Command::Start, SPEAKER)
        .await;
    assert_eq!(reply.kind, ReplyKind::Done);
    assert_eq!(
        reply.link.as_deref(),
        Some("https://example.com/app?role=speaker&panels=student%2Cspeaker")
    );

    let reply = h
        .dispatcher
        .handle_command(&Principal::new(REVIEWER), Command::WhoAmI, REVIEWER)
        .await;
    assert_eq!(reply.data.unwrap()["role"], "rating");

    let reply = h
        .dispatcher
        .handle_command(&Principal::new(SPEAKER), Command::SetReviewChat, -1)
        .await;
    assert_eq!(reply.kind, ReplyKind::Denied);
    assert_eq!(
        attendance_bot::db::settings::get_review_chat_id(&h.pool).await.unwrap(),
        None
    );

    set_review_chat(&h).await;
    assert_eq!(
        attendance_bot::db::settings::get_review_chat_id(&h.pool).await.unwrap(),
        Some(REVIEW_CHAT)
    );
}
