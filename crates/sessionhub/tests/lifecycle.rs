//! Session lifecycle through the public registry API.

mod common;

use std::time::Duration;

use common::{harness, pair, wait_for_state, wait_until};
use sessionhub::application::events::SessionEvent;
use sessionhub::application::registry::RegistryError;
use sessionhub::application::session::PairingError;
use sessionhub_core::{Payload, RejectReason, SendOutcome, SessionId, SessionState, SessionStats};

#[tokio::test(start_paused = true)]
async fn test_end_to_end_pair_send_disconnect_until_failed() {
    // Arrange
    let h = harness();
    let id = SessionId::new("e2e");

    // Act / Assert – fresh session waits for pairing
    let status = h.registry.initialize(&id).await.unwrap();
    assert_eq!(status.state, SessionState::Uninitialized);

    let challenge = h.registry.request_pairing(&id).await.unwrap();
    assert_eq!(challenge.code, "MOCK-1");
    assert_eq!(
        h.registry.get_status(&id).await.unwrap().pairing_code.as_deref(),
        Some("MOCK-1")
    );

    assert!(h.transport.complete_pairing(&id, b"creds"));
    let status = wait_for_state(&h.registry, &id, SessionState::Connected).await;
    assert!(status.is_ready);
    assert!(status.pairing_code.is_none());
    assert!(h.credentials.contains(&id).await);

    let outcome = h.registry.send_message(&id, "+000", Payload::text("hi")).await;
    assert_eq!(outcome, SendOutcome::Sent);
    let sent = h.transport.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].destination.as_str(), "25800");

    // The network goes away for good.
    h.transport.set_fail_connects(true);
    assert!(h.transport.disconnect(&id, "timeout"));
    let status = wait_for_state(&h.registry, &id, SessionState::Reconnecting).await;
    assert_eq!(status.reconnect_attempts, 1);
    assert_eq!(status.last_error.as_deref(), Some("timeout"));

    let status = wait_until(&h.registry, &id, Duration::from_secs(3600), |s| {
        s.state == SessionState::Failed
    })
    .await;
    assert_eq!(status.reconnect_attempts, 10);
    assert_eq!(status.stats.reconnect_count, 10);
    // One pairing connect plus ten reconnect attempts.
    assert_eq!(h.transport.connect_count(&id), 11);

    // Failed is terminal: nothing retries on its own.
    tokio::time::sleep(Duration::from_secs(3600)).await;
    let status = h.registry.get_status(&id).await.unwrap();
    assert_eq!(status.state, SessionState::Failed);
    assert_eq!(h.transport.connect_count(&id), 11);
    assert_eq!(
        h.registry.send_message(&id, "+000", Payload::text("late")).await,
        SendOutcome::rejected(RejectReason::SessionFailed)
    );
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_double_between_attempts() {
    // Arrange
    let h = harness();
    let id = SessionId::new("backoff");
    pair(&h, &id).await;
    h.transport.set_fail_connects(true);

    // Act
    let started = tokio::time::Instant::now();
    assert!(h.transport.disconnect(&id, "connection reset"));
    wait_until(&h.registry, &id, Duration::from_secs(120), |_| {
        h.transport.connect_count(&id) == 1 + 4
    })
    .await;

    // Assert – 5 + 10 + 20 + 40 seconds
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(75), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(80), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_initialize_creates_one_supervisor() {
    // Arrange – stored credentials, so every supervisor would connect
    let h = harness();
    let id = SessionId::new("shared");
    h.credentials.insert(id.clone(), b"creds".to_vec()).await;

    // Act
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let registry = h.registry.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move { registry.initialize(&id).await }));
    }
    for task in tasks {
        let status = task.await.unwrap().unwrap();
        assert_eq!(status.id, id);
    }
    wait_for_state(&h.registry, &id, SessionState::Connected).await;

    // Assert
    assert_eq!(h.transport.connect_count(&id), 1);
    assert_eq!(h.registry.list_all().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_initialize_with_stored_credentials_connects_without_pairing() {
    let h = harness();
    let id = SessionId::new("known");
    h.credentials.insert(id.clone(), b"creds".to_vec()).await;

    h.registry.initialize(&id).await.unwrap();
    let status = wait_for_state(&h.registry, &id, SessionState::Connected).await;

    assert!(status.connected_at.is_some());
    assert_eq!(
        h.registry.request_pairing(&id).await,
        Err(PairingError::AlreadyPaired)
    );
}

#[tokio::test(start_paused = true)]
async fn test_delete_then_initialize_is_a_fresh_session() {
    // Arrange – a paired session with some history
    let h = harness();
    let id = SessionId::new("recycled");
    pair(&h, &id).await;
    h.registry.send_message(&id, "+000", Payload::text("one")).await;
    h.transport.set_fail_connects(true);
    h.transport.disconnect(&id, "connection reset");
    wait_for_state(&h.registry, &id, SessionState::Reconnecting).await;
    h.registry.send_message(&id, "+000", Payload::text("queued")).await;

    // Act
    h.registry.delete(&id).await.unwrap();
    let status = h.registry.initialize(&id).await.unwrap();

    // Assert
    assert_eq!(status.state, SessionState::Uninitialized);
    assert_eq!(status.stats, SessionStats::default());
    assert_eq!(status.queue_size, 0);
    assert_eq!(status.reconnect_attempts, 0);
    assert!(!h.credentials.contains(&id).await);
    assert_eq!(h.transport.logout_count(&id), 0, "no live link to log out");
}

#[tokio::test(start_paused = true)]
async fn test_delete_connected_session_logs_out_transport() {
    let h = harness();
    let id = SessionId::new("bye");
    pair(&h, &id).await;
    let mut events = h.registry.subscribe();

    h.registry.delete(&id).await.unwrap();

    assert_eq!(h.transport.logout_count(&id), 1);
    assert!(!h.credentials.contains(&id).await);
    assert!(matches!(
        h.registry.get_status(&id).await,
        Err(RegistryError::NotFound(_))
    ));
    let mut saw_removed = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::Removed { .. }) {
            saw_removed = true;
        }
    }
    assert!(saw_removed);
}

#[tokio::test(start_paused = true)]
async fn test_transport_logout_is_terminal_and_removes_session() {
    // Arrange
    let h = harness();
    let id = SessionId::new("revoked");
    pair(&h, &id).await;

    // Act
    assert!(h.transport.disconnect(&id, "logged out from phone"));

    // Assert – the supervisor ends and the registry forgets the session
    for _ in 0..100 {
        if h.registry.get_status(&id).await.is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(matches!(
        h.registry.get_status(&id).await,
        Err(RegistryError::NotFound(_))
    ));
    assert!(!h.credentials.contains(&id).await);
    assert_eq!(h.transport.connect_count(&id), 1, "terminal disconnects never reconnect");
    assert_eq!(
        h.registry.send_message(&id, "+000", Payload::text("x")).await,
        SendOutcome::rejected(RejectReason::NotInitialized)
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_health_checks_force_a_reconnect() {
    // Arrange
    let h = harness();
    let id = SessionId::new("flaky");
    pair(&h, &id).await;
    let mut events = h.registry.subscribe();

    // Act – three failed probes, 60 s apart
    h.transport.set_probe_healthy(false);
    wait_until(&h.registry, &id, Duration::from_secs(300), |s| {
        s.state == SessionState::Reconnecting
    })
    .await;
    h.transport.set_probe_healthy(true);
    let status = wait_until(&h.registry, &id, Duration::from_secs(300), |s| {
        s.state == SessionState::Connected
    })
    .await;

    // Assert
    assert_eq!(status.stats.reconnect_count, 1);
    assert_eq!(status.reconnect_attempts, 0, "success resets the backoff");
    assert_eq!(h.transport.connect_count(&id), 2);
    let mut failures = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::HealthCheckFailed {
            consecutive_failures,
            ..
        } = event
        {
            failures.push(consecutive_failures);
        }
    }
    assert_eq!(failures, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_state_sees_waiting_pairing() {
    let h = harness();
    let id = SessionId::new("pairing");

    h.registry.request_pairing(&id).await.unwrap();
    let status = wait_for_state(&h.registry, &id, SessionState::WaitingPairing).await;

    assert!(!status.is_ready);
    assert_eq!(status.pairing_code.as_deref(), Some("MOCK-1"));
}

#[tokio::test(start_paused = true)]
async fn test_reset_keeps_credentials_and_reconnects() {
    // Arrange – a session that ended up Failed
    let h = harness();
    let id = SessionId::new("phoenix");
    pair(&h, &id).await;
    h.transport.set_fail_connects(true);
    h.transport.disconnect(&id, "connection reset");
    wait_until(&h.registry, &id, Duration::from_secs(3600), |s| {
        s.state == SessionState::Failed
    })
    .await;

    // Act
    h.transport.set_fail_connects(false);
    h.registry.reset(&id).await.unwrap();
    let status = wait_for_state(&h.registry, &id, SessionState::Connected).await;

    // Assert
    assert!(h.credentials.contains(&id).await);
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(status.stats.reconnect_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_logs_record_transitions_per_session() {
    let h = harness();
    let a = SessionId::new("a");
    let b = SessionId::new("b");
    pair(&h, &a).await;
    h.registry.initialize(&b).await.unwrap();

    let a_logs = h.registry.get_logs(Some(&a), None).await;
    let all_logs = h.registry.get_logs(None, Some(1000)).await;

    assert!(a_logs.iter().all(|e| e.session_id.as_ref() == Some(&a)));
    assert!(a_logs.iter().any(|e| e.message.ends_with("-> connected")));
    assert!(all_logs.len() > a_logs.len());
    assert_eq!(h.registry.get_logs(None, Some(2)).await.len(), 2);
}
