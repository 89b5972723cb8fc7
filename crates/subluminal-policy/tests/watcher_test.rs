//! Bundle hot-reload: a changed file swaps the compiled bundle in, a
//! broken file keeps the previous bundle active.

use std::sync::Arc;
use std::time::{Duration, Instant};
use subluminal_policy::{BundleWatcher, PolicyEngine, load_bundle_file};
use subluminal_types::{Client, Env, RunInfo};

fn identity() -> RunInfo {
    RunInfo {
        run_id: "run-w".to_string(),
        agent_id: "agent-w".to_string(),
        client: Client::Headless,
        env: Env::Ci,
        principal: None,
        workload: None,
    }
}

fn wait_for_policy_id(engine: &PolicyEngine, want: &str, deadline: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if engine.policy_info().policy_id == want {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

#[test]
fn watcher_swaps_bundle_on_change_and_survives_bad_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.json");
    std::fs::write(&path, r#"{"policy_id":"v1"}"#).unwrap();

    let engine = Arc::new(PolicyEngine::with_bundle(
        identity(),
        load_bundle_file(&path).unwrap(),
    ));
    assert_eq!(engine.policy_info().policy_id, "v1");

    let _watcher = BundleWatcher::spawn(
        path.clone(),
        engine.clone(),
        Duration::from_millis(100),
        false,
    )
    .unwrap();

    std::fs::write(&path, r#"{"policy_id":"v2"}"#).unwrap();
    assert!(
        wait_for_policy_id(&engine, "v2", Duration::from_secs(10)),
        "watcher did not pick up the rewritten bundle"
    );

    // A reload that fails to parse keeps the previous bundle active.
    std::fs::write(&path, "{ not json").unwrap();
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(engine.policy_info().policy_id, "v2");

    // And a later good write recovers.
    std::fs::write(&path, r#"{"policy_id":"v3"}"#).unwrap();
    assert!(
        wait_for_policy_id(&engine, "v3", Duration::from_secs(10)),
        "watcher did not recover after a bad bundle"
    );
}
