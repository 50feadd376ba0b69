//! Lifecycle tests: load/unload/lock/unlock no-ops, feature flags, and the
//! download job handshake.

mod common;

use anyhow::Result;
use common::{loaded_snapshot, ok, status, test_config, unloaded_snapshot, MockBackend};
use netassure::lifecycle::Transition;
use netassure::session::Session;
use netassure::transport::{ApiRequest, ApiResponse, Method};
use netassure::ClientError;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const ARCHIVE: &[u8] = b"snapshot archive bytes";

fn listing() -> Value {
    json!([
        loaded_snapshot("loaded-1", false),
        unloaded_snapshot("unloaded-1"),
        loaded_snapshot("locked-1", true),
    ])
}

/// Backend that accepts every lifecycle call and keeps settings in memory.
fn lifecycle_backend(settings: Arc<Mutex<Value>>) -> Arc<MockBackend> {
    MockBackend::new(move |req: &ApiRequest| {
        let path = req.path.as_str();
        match req.method {
            Method::Get if path == "snapshots" => ok(listing()),
            Method::Get if path.ends_with("/settings") => ok(settings.lock().unwrap().clone()),
            Method::Patch if path.ends_with("/settings") => {
                *settings.lock().unwrap() = req.body.clone().unwrap();
                ok(json!({}))
            }
            Method::Post
                if path == "snapshots/load"
                    || path == "snapshots/unload"
                    || path.ends_with("/lock")
                    || path.ends_with("/unlock") =>
            {
                ok(json!({ "success": true }))
            }
            Method::Post if path == "tables/jobs" => tagged_job(req, "done"),
            _ => status(404, "not found"),
        }
    })
}

/// Answer a job lookup with the job it filters for, in state `status`.
fn tagged_job(req: &ApiRequest, status: &str) -> Result<ApiResponse> {
    let filters = &req.body.as_ref().unwrap()["filters"];
    ok(json!({
        "data": [{
            "id": "12",
            "name": filters["name"][1].clone(),
            "jobDetail": filters["jobDetail"][1].clone(),
            "status": status,
        }],
        "meta": { "count": 1 }
    }))
}

fn open(settings: Value) -> (Session, Arc<MockBackend>) {
    let backend = lifecycle_backend(Arc::new(Mutex::new(settings)));
    let session = Session::open(backend.clone(), &test_config()).unwrap();
    (session, backend)
}

#[test]
fn test_load_on_loaded_snapshot_sends_nothing() {
    let (mut session, backend) = open(json!({}));
    let before = backend.requests().len();

    assert_eq!(session.load("loaded-1").unwrap(), Transition::Unchanged);
    assert_eq!(backend.requests().len(), before);
}

#[test]
fn test_load_submits_tagged_job_and_caches_flags() {
    let (mut session, backend) = open(json!({
        "disabledPostDiscoveryActions": ["historicalData"]
    }));

    assert_eq!(session.load("unloaded-1").unwrap(), Transition::Applied);

    let loads = backend.calls(Method::Post, "snapshots/load");
    assert_eq!(loads.len(), 1);
    let body = loads[0].body.as_ref().unwrap();
    assert_eq!(body["snapshots"], json!(["unloaded-1"]));
    assert!(body["jobDetail"].as_i64().unwrap() > 0);
    assert_eq!(
        backend.calls(Method::Get, "snapshots/unloaded-1/settings").len(),
        1
    );

    let snap = session.resolve("unloaded-1").unwrap();
    assert!(snap.loaded());
    let flags = snap.feature_flags().unwrap();
    assert!(flags.historical_data_disabled);
    assert!(!flags.graph_cache_disabled);
}

#[test]
fn test_unload_then_unload_again() {
    let (mut session, backend) = open(json!({}));

    assert_eq!(session.unload("loaded-1").unwrap(), Transition::Applied);
    assert_eq!(session.unload("loaded-1").unwrap(), Transition::Unchanged);

    assert_eq!(backend.calls(Method::Post, "snapshots/unload").len(), 1);
    assert_eq!(session.resolve("loaded-1").unwrap().status, "unloaded");
    // symbolic keys stay put until refresh
    assert_eq!(session.registry().symbolic("$last"), Some("loaded-1"));
}

#[test]
fn test_lock_twice_sends_one_request() {
    let (mut session, backend) = open(json!({}));

    assert_eq!(session.lock("loaded-1").unwrap(), Transition::Applied);
    assert_eq!(session.lock("loaded-1").unwrap(), Transition::Unchanged);

    assert_eq!(backend.calls(Method::Post, "snapshots/loaded-1/lock").len(), 1);
    assert!(session.resolve("loaded-1").unwrap().locked);
}

#[test]
fn test_unlock_locked_snapshot() {
    let (mut session, backend) = open(json!({}));
    assert_eq!(session.unlock("$lastLocked").unwrap(), Transition::Applied);
    assert_eq!(
        backend.calls(Method::Post, "snapshots/locked-1/unlock").len(),
        1
    );
    assert!(!session.resolve("locked-1").unwrap().locked);
}

#[test]
fn test_lock_requires_loaded_snapshot() {
    let (mut session, backend) = open(json!({}));
    let err = session.lock("unloaded-1").unwrap_err();
    match err {
        ClientError::SnapshotNotLoaded { snapshot, action } => {
            assert_eq!(snapshot, "unloaded-1");
            assert_eq!(action, "lock");
        }
        other => panic!("expected SnapshotNotLoaded, got {:?}", other),
    }
    assert!(backend
        .calls(Method::Post, "snapshots/unloaded-1/lock")
        .is_empty());
}

#[test]
fn test_rejected_lock_is_fatal_and_leaves_record() {
    let backend = MockBackend::new(|req| match req.path.as_str() {
        "snapshots" => ok(listing()),
        _ => status(500, "lock service down"),
    });
    let mut session = Session::open(backend.clone(), &test_config()).unwrap();

    let err = session.lock("loaded-1").unwrap_err();
    assert!(matches!(err, ClientError::BackendUnavailable { .. }));
    let msg = err.to_string();
    assert!(msg.contains("loaded-1"));
    assert!(msg.contains("lock"));
    assert!(!session.resolve("loaded-1").unwrap().locked);
    // fatal: no retry
    assert_eq!(backend.calls(Method::Post, "snapshots/loaded-1/lock").len(), 1);
}

#[test]
fn test_identical_flags_skip_patch() {
    let (mut session, backend) = open(json!({
        "disabledPostDiscoveryActions": ["graphCache"]
    }));

    let transition = session
        .update_feature_flags("loaded-1", true, false, false)
        .unwrap();
    assert_eq!(transition, Transition::Unchanged);
    assert!(backend
        .calls(Method::Patch, "snapshots/loaded-1/settings")
        .is_empty());
}

#[test]
fn test_changed_flags_are_patched() {
    let (mut session, backend) = open(json!({
        "disabledPostDiscoveryActions": []
    }));

    let transition = session
        .update_feature_flags("loaded-1", false, true, true)
        .unwrap();
    assert_eq!(transition, Transition::Applied);

    let patches = backend.calls(Method::Patch, "snapshots/loaded-1/settings");
    assert_eq!(patches.len(), 1);
    assert_eq!(
        patches[0].body.as_ref().unwrap()["disabledPostDiscoveryActions"],
        json!(["historicalData", "intentVerification"])
    );
    let flags = session.resolve("loaded-1").unwrap().feature_flags().unwrap();
    assert!(flags.intent_verification_disabled);

    // the server now reports the new set
    let again = session.settings("loaded-1").unwrap();
    assert_eq!(again, flags);
}

#[test]
fn test_flags_need_loaded_snapshot() {
    let (mut session, _backend) = open(json!({}));
    assert!(matches!(
        session.update_feature_flags("unloaded-1", true, true, true),
        Err(ClientError::SnapshotNotLoaded { .. })
    ));
}

// ─── Download ───────────────────────────────────────────────────────

/// Backend where the download job becomes visible on poll number `ready_on`.
fn download_backend(ready_on: u32, jobs: Value) -> (Arc<MockBackend>, Arc<AtomicU32>) {
    let polls = Arc::new(AtomicU32::new(0));
    let counter = polls.clone();
    let backend = MockBackend::new(move |req: &ApiRequest| match (req.method, req.path.as_str()) {
        (Method::Get, "snapshots") => ok(listing()),
        (Method::Get, "snapshots/loaded-1/download") => ok(json!({ "success": true })),
        (Method::Post, "tables/jobs") => {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let data = if n >= ready_on { jobs.clone() } else { json!([]) };
            let count = data.as_array().map_or(0, |a| a.len());
            ok(json!({ "data": data, "meta": { "count": count } }))
        }
        (Method::Get, p) if p.starts_with("jobs/") && p.ends_with("/download") => {
            Ok(ApiResponse::new(200, ARCHIVE.to_vec()))
        }
        _ => status(404, "not found"),
    });
    (backend, polls)
}

#[test]
fn test_download_picks_highest_job_id() {
    let (backend, _) = download_backend(
        1,
        json!([
            { "id": "98", "name": "snapshotDownload", "snapshot": "loaded-1", "status": "done" },
            { "id": "1207", "name": "snapshotDownload", "snapshot": "loaded-1", "status": "done" },
        ]),
    );
    let session = Session::open(backend.clone(), &test_config()).unwrap();
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("archive.tar");

    let artifact = session.download("$last", Some(&out), None, None).unwrap();

    assert_eq!(artifact.job, "1207");
    assert_eq!(backend.calls(Method::Get, "jobs/1207/download").len(), 1);
    assert!(backend.calls(Method::Get, "jobs/98/download").is_empty());
    assert_eq!(std::fs::read(&out).unwrap(), ARCHIVE);
    assert_eq!(artifact.size, ARCHIVE.len() as u64);
    assert_eq!(artifact.sha256, hex::encode(Sha256::digest(ARCHIVE)));

    let job_query = &backend.calls(Method::Post, "tables/jobs")[0];
    let filters = &job_query.body.as_ref().unwrap()["filters"];
    assert_eq!(filters["snapshot"], json!(["eq", "loaded-1"]));
    assert_eq!(filters["name"], json!(["eq", "snapshotDownload"]));
}

#[test]
fn test_download_polls_until_job_appears() {
    let (backend, polls) = download_backend(
        3,
        json!([{ "id": 55, "name": "snapshotDownload", "snapshot": "loaded-1", "status": "done" }]),
    );
    let session = Session::open(backend, &test_config()).unwrap();
    let tmp = TempDir::new().unwrap();

    let artifact = session
        .download("loaded-1", Some(tmp.path()), Some(5), None)
        .unwrap();

    assert_eq!(polls.load(Ordering::SeqCst), 3);
    assert_eq!(artifact.path, tmp.path().join("loaded-1.tar"));
    assert!(artifact.path.exists());
}

#[test]
fn test_download_gives_up_after_retry_budget() {
    let (backend, polls) = download_backend(u32::MAX, json!([]));
    let session = Session::open(backend.clone(), &test_config()).unwrap();
    let tmp = TempDir::new().unwrap();

    let err = session
        .download("loaded-1", Some(tmp.path()), Some(4), None)
        .unwrap_err();

    match err {
        ClientError::DownloadJobNotFound { snapshot, attempts } => {
            assert_eq!(snapshot, "loaded-1");
            assert_eq!(attempts, 4);
        }
        other => panic!("expected DownloadJobNotFound, got {:?}", other),
    }
    assert_eq!(polls.load(Ordering::SeqCst), 4);
    assert!(!tmp.path().join("loaded-1.tar").exists());
}

#[test]
fn test_download_uses_configured_directory() {
    let (backend, _) = download_backend(
        1,
        json!([{ "id": "7", "name": "snapshotDownload", "snapshot": "loaded-1", "status": "done" }]),
    );
    let tmp = TempDir::new().unwrap();
    let mut config = test_config();
    config.download.dir = Some(tmp.path().to_path_buf());
    let session = Session::open(backend, &config).unwrap();

    let artifact = session.download("loaded-1", None, None, None).unwrap();
    assert_eq!(artifact.path, tmp.path().join("loaded-1.tar"));
    assert_eq!(std::fs::read(&artifact.path).unwrap(), ARCHIVE);
}

// ─── Waiting for load jobs ──────────────────────────────────────────

#[test]
fn test_wait_for_load_job() {
    let polls = Arc::new(AtomicU32::new(0));
    let counter = polls.clone();
    let backend = MockBackend::new(move |req: &ApiRequest| match (req.method, req.path.as_str()) {
        (Method::Get, "snapshots") => ok(listing()),
        (Method::Post, "snapshots/load") => ok(json!({})),
        (Method::Get, "snapshots/unloaded-1/settings") => ok(json!({})),
        (Method::Post, "tables/jobs") => {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let body = req.body.clone().unwrap();
            let tag = body["filters"]["jobDetail"][1].clone();
            let state = if n == 0 { "running" } else { "done" };
            ok(json!({
                "data": [{ "id": "12", "name": "snapshotLoad", "jobDetail": tag, "status": state }],
                "meta": { "count": 1 }
            }))
        }
        _ => status(404, "not found"),
    });
    let mut config = test_config();
    config.lifecycle.wait_for_jobs = true;
    let mut session = Session::open(backend.clone(), &config).unwrap();

    assert_eq!(session.load("unloaded-1").unwrap(), Transition::Applied);
    assert_eq!(polls.load(Ordering::SeqCst), 2);

    let load_tag = backend.calls(Method::Post, "snapshots/load")[0]
        .body
        .as_ref()
        .unwrap()["jobDetail"]
        .clone();
    let job_query = &backend.calls(Method::Post, "tables/jobs")[0];
    assert_eq!(
        job_query.body.as_ref().unwrap()["filters"]["jobDetail"],
        json!(["eq", load_tag])
    );
}

#[test]
fn test_failed_load_job_is_reported() {
    let backend = MockBackend::new(|req: &ApiRequest| match (req.method, req.path.as_str()) {
        (Method::Get, "snapshots") => ok(listing()),
        (Method::Post, "snapshots/load") => ok(json!({})),
        (Method::Post, "tables/jobs") => ok(json!({
            "data": [{ "id": "3", "name": "snapshotLoad", "status": "failed" }],
            "meta": { "count": 1 }
        })),
        _ => status(404, "not found"),
    });
    let mut config = test_config();
    config.lifecycle.wait_for_jobs = true;
    let mut session = Session::open(backend, &config).unwrap();

    let err = session.load("unloaded-1").unwrap_err();
    assert!(matches!(err, ClientError::JobFailed { .. }));
    assert!(!session.resolve("unloaded-1").unwrap().loaded());
}

#[test]
fn test_load_reads_settings_only_after_job_finishes() {
    let finished = Arc::new(AtomicBool::new(false));
    let polls = Arc::new(AtomicU32::new(0));
    let (done, counter) = (finished.clone(), polls.clone());
    let backend = MockBackend::new(move |req: &ApiRequest| match (req.method, req.path.as_str()) {
        (Method::Get, "snapshots") => ok(listing()),
        (Method::Post, "snapshots/load") => ok(json!({})),
        (Method::Post, "tables/jobs") => {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                tagged_job(req, "running")
            } else {
                done.store(true, Ordering::SeqCst);
                tagged_job(req, "done")
            }
        }
        (Method::Get, "snapshots/unloaded-1/settings") => {
            if done.load(Ordering::SeqCst) {
                ok(json!({ "disabledPostDiscoveryActions": ["graphCache"] }))
            } else {
                status(409, "snapshot is loading")
            }
        }
        _ => status(404, "not found"),
    });
    let mut session = Session::open(backend.clone(), &test_config()).unwrap();

    assert_eq!(session.load("unloaded-1").unwrap(), Transition::Applied);

    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(polls.load(Ordering::SeqCst), 2);
    assert_eq!(backend.calls(Method::Post, "snapshots/load").len(), 1);
    assert_eq!(
        backend.calls(Method::Get, "snapshots/unloaded-1/settings").len(),
        1
    );
    let snap = session.resolve("unloaded-1").unwrap();
    assert!(snap.loaded());
    assert!(snap.feature_flags().unwrap().graph_cache_disabled);
}

#[test]
fn test_settings_failure_after_load_names_load() {
    let backend = MockBackend::new(|req: &ApiRequest| match (req.method, req.path.as_str()) {
        (Method::Get, "snapshots") => ok(listing()),
        (Method::Post, "snapshots/load") => ok(json!({})),
        (Method::Post, "tables/jobs") => tagged_job(req, "done"),
        _ => status(500, "settings unavailable"),
    });
    let mut session = Session::open(backend, &test_config()).unwrap();

    match session.load("unloaded-1").unwrap_err() {
        ClientError::BackendUnavailable { action, message } => {
            assert_eq!(action, "load snapshot unloaded-1");
            assert!(message.contains("settings"));
        }
        other => panic!("expected BackendUnavailable, got {:?}", other),
    }
}

#[test]
fn test_unwaited_load_leaves_record_alone() {
    let backend = lifecycle_backend(Arc::new(Mutex::new(json!({}))));
    let mut config = test_config();
    config.lifecycle.wait_for_jobs = false;
    let mut session = Session::open(backend.clone(), &config).unwrap();

    assert_eq!(session.load("unloaded-1").unwrap(), Transition::Submitted);
    assert_eq!(session.unload("loaded-1").unwrap(), Transition::Submitted);

    assert_eq!(backend.calls(Method::Post, "snapshots/load").len(), 1);
    assert!(backend
        .calls(Method::Get, "snapshots/unloaded-1/settings")
        .is_empty());
    assert!(backend.calls(Method::Post, "tables/jobs").is_empty());
    assert!(!session.resolve("unloaded-1").unwrap().loaded());
    assert!(session.resolve("loaded-1").unwrap().loaded());
}
