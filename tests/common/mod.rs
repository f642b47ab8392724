#![allow(dead_code)]

use async_trait::async_trait;
use phoneauth_server::error::SmsError;
use phoneauth_server::{
    AppState, Argon2Passwords, AuthService, MemoryStore, Settings, SmsSender, Stores,
};
use std::sync::{Arc, Mutex};

/// Records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingSms {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSms {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Six-digit code from the most recent message to `phone_number`.
    pub fn last_code(&self, phone_number: &str) -> String {
        let sent = self.sent.lock().unwrap();
        let (_, body) = sent
            .iter()
            .rev()
            .find(|(to, _)| to == phone_number)
            .expect("no SMS sent to this number");
        body.split(|c: char| !c.is_ascii_digit())
            .find(|part| part.len() == 6)
            .expect("no code in SMS body")
            .to_string()
    }
}

#[async_trait]
impl SmsSender for RecordingSms {
    async fn send(&self, phone_number: &str, body: &str) -> Result<(), SmsError> {
        self.sent
            .lock()
            .unwrap()
            .push((phone_number.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub sms: Arc<RecordingSms>,
    pub service: Arc<AuthService>,
    pub settings: Settings,
}

pub fn test_settings() -> Settings {
    Settings::new_for_test().expect("Failed to load test config")
}

pub fn build_service(settings: &Settings) -> (Arc<MemoryStore>, Arc<RecordingSms>, AuthService) {
    let store = Arc::new(MemoryStore::new());
    let sms = Arc::new(RecordingSms::default());
    let service = AuthService::new(
        Stores::single(store.clone()),
        sms.clone(),
        Arc::new(Argon2Passwords),
        &settings.auth,
    );
    (store, sms, service)
}

pub fn test_context() -> TestContext {
    let settings = test_settings();
    let (store, sms, service) = build_service(&settings);
    TestContext {
        store,
        sms,
        service: Arc::new(service),
        settings,
    }
}

pub fn test_state() -> (AppState, Arc<MemoryStore>, Arc<RecordingSms>) {
    let settings = test_settings();
    let (store, sms, service) = build_service(&settings);
    (AppState::with_auth_service(settings, service), store, sms)
}
