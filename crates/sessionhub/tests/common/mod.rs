//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sessionhub::application::registry::SessionRegistry;
use sessionhub::infrastructure::storage::memory::InMemoryCredentialStore;
use sessionhub::infrastructure::transport::mock::MockTransport;
use sessionhub_core::{SessionId, SessionPolicy, SessionState, SessionStatus};

pub struct Harness {
    pub registry: SessionRegistry,
    pub transport: MockTransport,
    pub credentials: InMemoryCredentialStore,
}

pub fn harness() -> Harness {
    harness_with(SessionPolicy::default())
}

pub fn harness_with(policy: SessionPolicy) -> Harness {
    let transport = MockTransport::new();
    let credentials = InMemoryCredentialStore::new();
    let registry = SessionRegistry::new(
        policy,
        Arc::new(transport.clone()),
        Arc::new(credentials.clone()),
    );
    Harness {
        registry,
        transport,
        credentials,
    }
}

/// Polls the session's status until `pred` holds, or panics after `within`.
pub async fn wait_until(
    registry: &SessionRegistry,
    id: &SessionId,
    within: Duration,
    pred: impl Fn(&SessionStatus) -> bool,
) -> SessionStatus {
    let step = (within / 2000).max(Duration::from_millis(1));
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Ok(status) = registry.get_status(id).await {
            if pred(&status) {
                return status;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            let last = registry.get_status(id).await;
            panic!("condition not met within {within:?}; last status: {last:?}");
        }
        tokio::time::sleep(step).await;
    }
}

pub async fn wait_for_state(registry: &SessionRegistry, id: &SessionId, state: SessionState) -> SessionStatus {
    wait_until(registry, id, Duration::from_secs(60), |s| s.state == state).await
}

/// Pairs a fresh session through the mock transport and waits until it is
/// `Connected`.
pub async fn pair(h: &Harness, id: &SessionId) -> SessionStatus {
    h.registry
        .request_pairing(id)
        .await
        .expect("pairing challenge");
    assert!(h.transport.complete_pairing(id, b"paired-credentials"));
    wait_for_state(&h.registry, id, SessionState::Connected).await
}
