use notify::{Config, Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::Result;
use crate::bundle::load_bundle_file;
use crate::engine::PolicyEngine;

/// Polls a bundle file and swaps recompiled bundles into the engine.
///
/// A reload that fails to parse or lint leaves the previous bundle
/// active; a successful reload resets all per-run policy state.
pub struct BundleWatcher {
    _watcher: PollWatcher,
}

impl BundleWatcher {
    pub fn spawn(
        path: PathBuf,
        engine: Arc<PolicyEngine>,
        poll_interval: Duration,
        debug: bool,
    ) -> Result<Self> {
        let config = Config::default()
            .with_poll_interval(poll_interval)
            .with_compare_contents(true);

        let reload_path = path.clone();
        let mut watcher = PollWatcher::new(
            move |res: notify::Result<Event>| {
                let Ok(event) = res else { return };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                match load_bundle_file(&reload_path) {
                    Ok(bundle) => {
                        let hash = bundle.hash.clone();
                        engine.install(bundle);
                        if debug {
                            eprintln!(
                                "subluminal: policy reloaded from {} ({})",
                                reload_path.display(),
                                &hash[..12.min(hash.len())]
                            );
                        }
                    }
                    Err(e) => {
                        if debug {
                            eprintln!(
                                "subluminal: policy reload failed, keeping previous bundle: {}",
                                e
                            );
                        }
                    }
                }
            },
            config,
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        Ok(Self { _watcher: watcher })
    }
}
