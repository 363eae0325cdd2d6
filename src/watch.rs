//! File watcher that turns graph edits on disk into script reloads.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::visual::VisualScriptingModule;

#[derive(Debug, Clone)]
struct GraphWatchEntry {
    script: Uuid,
    original: PathBuf,
}

pub struct GraphHotReload {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    watched: HashMap<PathBuf, GraphWatchEntry>,
    pending: HashMap<Uuid, Instant>,
    debounce: Duration,
}

pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    fs::canonicalize(&absolute).unwrap_or(absolute)
}

impl GraphHotReload {
    pub fn new(debounce: Duration) -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        if let Err(err) = watcher.configure(
            NotifyConfig::default().with_compare_contents(true).with_poll_interval(Duration::from_millis(250)),
        ) {
            warn!("graph watcher configuration warning: {err}");
        }
        Ok(Self { watcher, rx, watched: HashMap::new(), pending: HashMap::new(), debounce })
    }

    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        Self::new(Duration::from_millis(config.hot_reload_debounce_ms))
    }

    /// Starts watching `path` as the graph file of `script`.
    pub fn watch(&mut self, path: impl AsRef<Path>, script: Uuid) -> Result<()> {
        let original = path.as_ref().to_path_buf();
        self.watcher
            .watch(&original, RecursiveMode::NonRecursive)
            .map_err(|err| anyhow!("watch failed for '{}': {err}", original.display()))?;
        self.watched.insert(normalize_path(&original), GraphWatchEntry { script, original });
        Ok(())
    }

    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(entry) = self.watched.remove(&normalize_path(path.as_ref())) {
            self.watcher
                .unwatch(&entry.original)
                .map_err(|err| anyhow!("unwatch failed for '{}': {err}", entry.original.display()))?;
            self.pending.remove(&entry.script);
        }
        Ok(())
    }

    pub fn watched_len(&self) -> usize {
        self.watched.len()
    }

    pub fn path_of(&self, script: Uuid) -> Option<PathBuf> {
        self.watched.values().find(|entry| entry.script == script).map(|entry| entry.original.clone())
    }

    /// Scripts whose file changed and has been quiet for the debounce window.
    pub fn drain_changed(&mut self) -> Vec<Uuid> {
        let now = Instant::now();
        while let Ok(res) = self.rx.try_recv() {
            match res {
                Ok(event) if is_relevant(&event.kind) => {
                    for path in &event.paths {
                        if let Some(entry) = self.watched.get(&normalize_path(path)) {
                            self.pending.insert(entry.script, now);
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => warn!("graph watcher error: {err}"),
            }
        }
        let debounce = self.debounce;
        let ready: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) >= debounce)
            .map(|(script, _)| *script)
            .collect();
        for script in &ready {
            self.pending.remove(script);
        }
        ready
    }

    /// Reloads every script reported by [`Self::drain_changed`]. Returns how many
    /// scripts were actually reloaded.
    pub fn apply(&mut self, module: &VisualScriptingModule) -> usize {
        let mut reloaded = 0;
        for id in self.drain_changed() {
            let (Some(script), Some(path)) = (module.find_script(id), self.path_of(id)) else { continue };
            match module.reload_from_file(&script, &path) {
                Ok(true) => {
                    info!(script = %id.simple(), path = %path.display(), "hot reloaded graph");
                    reloaded += 1;
                }
                Ok(false) => {}
                Err(err) => warn!(script = %id.simple(), "graph hot reload failed: {err:?}"),
            }
        }
        reloaded
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Create(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_normalize_to_absolute() {
        assert!(normalize_path(Path::new("graphs/player.json")).is_absolute());
    }

    #[test]
    fn watching_tracks_script_ids() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("player.json");
        fs::write(&path, "{}").expect("write graph");
        let mut watcher = GraphHotReload::new(Duration::from_millis(0)).expect("watcher");
        let id = Uuid::from_u128(7);
        watcher.watch(&path, id).expect("watch");
        assert_eq!(watcher.watched_len(), 1);
        assert_eq!(watcher.path_of(id), Some(path.clone()));
        watcher.unwatch(&path).expect("unwatch");
        assert_eq!(watcher.watched_len(), 0);
        assert!(watcher.drain_changed().is_empty());
    }
}
