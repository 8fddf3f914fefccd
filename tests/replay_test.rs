//! End-to-end replay against the in-memory backend

use hidmimic::manager::{READY_POLL, MemoryBackend};
use hidmimic::protocol::UhidRequest;
use hidmimic::{DeviceManager, Error, ProfileRegistry, ReplayScheduler, Session};
use std::path::PathBuf;
use std::time::Duration;

fn load(name: &str) -> Session {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    Session::from_path(path).unwrap()
}

async fn ready_manager(session: &Session) -> (MemoryBackend, DeviceManager<MemoryBackend>) {
    let backend = MemoryBackend::auto_ready();
    let mut manager = DeviceManager::new(backend.clone());
    manager
        .create_session(session, &ProfileRegistry::builtin())
        .unwrap();
    manager.wait_until_ready(READY_POLL).await.unwrap();
    (backend, manager)
}

#[tokio::test(start_paused = true)]
async fn reports_keep_their_spacing() {
    let session = load("sixaxis.hid");
    let (backend, mut manager) = ready_manager(&session).await;

    ReplayScheduler::default()
        .inject_events(&mut manager, &session)
        .await
        .unwrap();

    let inputs: Vec<_> = backend.devices()[0]
        .sent_at()
        .into_iter()
        .filter(|(_, r)| matches!(r, UhidRequest::Input2 { .. }))
        .collect();
    assert_eq!(inputs.len(), 3);
    assert_eq!(inputs[1].0 - inputs[0].0, Duration::from_millis(16));
    assert_eq!(inputs[2].0 - inputs[0].0, Duration::from_millis(32));
    assert_eq!(
        inputs[1].1,
        UhidRequest::Input2 {
            data: vec![0x01, 0x00, 0x01, 0x00]
        }
    );
}

#[tokio::test(start_paused = true)]
async fn events_reach_their_own_device() {
    let session = load("two_devices.hid");
    let (backend, mut manager) = ready_manager(&session).await;

    let mut scheduler = ReplayScheduler::new(Duration::from_secs(2));
    let started = tokio::time::Instant::now();
    scheduler.inject_events(&mut manager, &session).await.unwrap();

    // 5s gap capped at 2s
    assert_eq!(started.elapsed(), Duration::from_millis(2100));
    let handles = backend.devices();
    assert_eq!(handles[0].inputs(), vec![vec![0x00, 0x01, 0x00], vec![0x00, 0xff, 0x00]]);
    assert_eq!(handles[1].inputs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn replay_can_repeat() {
    let session = load("sixaxis.hid");
    let (backend, mut manager) = ready_manager(&session).await;

    let mut scheduler = ReplayScheduler::default();
    assert_eq!(scheduler.inject_events(&mut manager, &session).await.unwrap(), 1);
    assert_eq!(scheduler.inject_events(&mut manager, &session).await.unwrap(), 2);
    assert_eq!(backend.devices()[0].inputs().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn replay_after_teardown_fails() {
    let session = load("sixaxis.hid");
    let (_backend, mut manager) = ready_manager(&session).await;
    manager.destroy_all();

    let err = ReplayScheduler::default()
        .inject_events(&mut manager, &session)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeviceNotReady { index: 0 }));
}
