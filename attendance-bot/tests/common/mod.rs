//! Shared test harness: in-memory database, recording gateway, wired dispatcher

#![allow(dead_code)]

use async_trait::async_trait;
use attendance_bot::dispatch::{Dispatcher, Principal, Reply};
use attendance_bot::gateway::{ChatGateway, ControlButton, EvidenceArtifact, GatewayError};
use attendance_common::config::BotConfig;
use attendance_common::db::{init_in_memory_database, Attendance};
use attendance_common::events::EventBus;
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

pub const MASTER: i64 = 1000;
pub const REVIEW_CHAT: i64 = -100_500;

#[derive(Debug, Clone, PartialEq)]
pub struct Forwarded {
    pub chat_id: i64,
    pub message_id: i64,
    pub file_id: String,
    pub caption: String,
    pub controls: Vec<String>,
}

/// Gateway that records every delivery and can be told to fail
#[derive(Default)]
pub struct RecordingGateway {
    next_message_id: AtomicI64,
    pub forwarded: Mutex<Vec<Forwarded>>,
    pub deleted: Mutex<Vec<(i64, i64)>>,
    pub sent: Mutex<Vec<(i64, String)>>,
    pub fail_deletes: AtomicBool,
    pub fail_sends: AtomicBool,
}

impl RecordingGateway {
    pub fn forwarded(&self) -> Vec<Forwarded> {
        self.forwarded.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(i64, i64)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGateway for RecordingGateway {
    async fn forward_evidence(
        &self,
        chat_id: i64,
        artifact: &EvidenceArtifact,
        caption: &str,
        controls: &[ControlButton],
    ) -> Result<i64, GatewayError> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 500;
        self.forwarded.lock().unwrap().push(Forwarded {
            chat_id,
            message_id,
            file_id: artifact.file_id.clone(),
            caption: caption.to_string(),
            controls: controls.iter().map(|c| c.data.clone()).collect(),
        });
        Ok(message_id)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), GatewayError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(GatewayError::MessageNotFound { chat_id, message_id });
        }
        self.deleted.lock().unwrap().push((chat_id, message_id));
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), GatewayError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(GatewayError::Delivery("user blocked the bot".to_string()));
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub pool: SqlitePool,
    pub config: BotConfig,
    pub event_bus: EventBus,
    pub gateway: Arc<RecordingGateway>,
    pub dispatcher: Dispatcher,
}

pub fn test_config() -> BotConfig {
    BotConfig {
        master_admin_ids: HashSet::from([MASTER]),
        webapp_url: Some("https://example.com/app".to_string()),
        ..Default::default()
    }
}

pub async fn harness() -> Harness {
    let pool = init_in_memory_database().await.unwrap();
    let config = test_config();
    let event_bus = EventBus::new(64);
    let gateway = Arc::new(RecordingGateway::default());
    let dispatcher = Dispatcher::new(pool.clone(), &config, event_bus.clone(), gateway.clone());

    Harness {
        pool,
        config,
        event_bus,
        gateway,
        dispatcher,
    }
}

impl Harness {
    /// Send mini-app data as `user_id`
    pub async fn webapp(&self, user_id: i64, payload: Value) -> Option<Reply> {
        self.dispatcher
            .handle_webapp_data(&Principal::new(user_id), &payload.to_string())
            .await
    }

    pub async fn attendance_for(&self, user_id: i64, lecture_id: &str) -> Option<Attendance> {
        attendance_bot::db::attendances::find_for_pair(&self.pool, user_id, lecture_id)
            .await
            .unwrap()
    }

    pub async fn attendance_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM attendances")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn lecture_rows(&self, lecture_id: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM lectures WHERE id = ?")
            .bind(lecture_id)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}
