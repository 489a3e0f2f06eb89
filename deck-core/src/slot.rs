//! Storage slots: per-directory clip catalogs with live change
//! detection.
//!
//! A slot scans its directory once at mount and then follows
//! filesystem events, so dropping a file into the watched folder makes
//! it appear in `disk list` without restarting the deck. One unreadable
//! file never prevents the rest of the catalog from loading.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use notify::event::ModifyKind;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::engine::{MediaEngine, MediaHandle};
use crate::error::DeckError;
use crate::timecode::{Rate, Timecode};

// ── SlotStatus ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Empty,
    Mounting,
    Mounted,
    Error,
}

impl SlotStatus {
    /// The wire representation used in `slot info` responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Empty => "empty",
            SlotStatus::Mounting => "mounting",
            SlotStatus::Mounted => "mounted",
            SlotStatus::Error => "error",
        }
    }
}

// ── DiskClip ─────────────────────────────────────────────────────

/// A media item visible in a slot. The name (base filename) is the
/// unique key within the catalog.
#[derive(Debug, Clone)]
pub struct DiskClip {
    pub name: String,
    pub path: PathBuf,
    pub duration: Timecode,
    pub handle: MediaHandle,
}

// ── Filesystem change observation ────────────────────────────────

/// A normalized filesystem change. Decouples the catalog's reaction
/// logic from any specific OS notification mechanism; tests feed
/// these directly through [`Slot::apply_change`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsChange {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed(PathBuf),
}

/// Start watching a directory, forwarding normalized changes into a
/// tokio channel. The watcher must be kept alive for events to flow.
pub fn watch_dir(
    path: &Path,
) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<FsChange>), DeckError> {
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!("watch error: {e}");
                    return;
                }
            };
            for path in event.paths {
                let change = match &event.kind {
                    EventKind::Create(_) => FsChange::Created(path),
                    EventKind::Modify(ModifyKind::Name(_)) => FsChange::Renamed(path),
                    EventKind::Modify(_) => FsChange::Modified(path),
                    EventKind::Remove(_) => FsChange::Removed(path),
                    _ => continue,
                };
                // Receiver gone means the slot was dropped; stop quietly.
                let _ = tx.send(change);
            }
        },
        Config::default(),
    )
    .map_err(|e| DeckError::Disk(e.to_string()))?;

    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|e| DeckError::Disk(e.to_string()))?;

    Ok((watcher, rx))
}

// ── Slot ─────────────────────────────────────────────────────────

/// One storage slot: a directory-backed clip catalog.
///
/// Clips are held sorted by name under a reader-shared /
/// writer-exclusive lock. Adding a clip whose name already exists
/// overwrites the entry in place, preserving its position.
pub struct Slot {
    id: u32,
    path: PathBuf,
    volume_name: String,
    status: RwLock<SlotStatus>,
    clips: RwLock<Vec<DiskClip>>,
    engine: Arc<dyn MediaEngine>,
    rate: Rate,
    // RecommendedWatcher is not Sync; parked here to keep it alive.
    _watcher: Mutex<Option<RecommendedWatcher>>,
}

impl Slot {
    /// Mount a directory as a slot: scan it, probe every entry, and
    /// start watching for changes.
    ///
    /// Fails only if the directory itself cannot be read; individual
    /// clips that fail to probe are logged and skipped.
    pub async fn mount(
        id: u32,
        path: impl Into<PathBuf>,
        engine: Arc<dyn MediaEngine>,
        rate: Rate,
    ) -> Result<Arc<Self>, DeckError> {
        let path = path.into();
        let volume_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string());

        let slot = Arc::new(Self {
            id,
            path: path.clone(),
            volume_name,
            status: RwLock::new(SlotStatus::Mounting),
            clips: RwLock::new(Vec::new()),
            engine,
            rate,
            _watcher: Mutex::new(None),
        });

        // Watch before scanning so nothing slips between the two.
        let (watcher, mut rx) = watch_dir(&path)?;
        *slot._watcher.lock().unwrap() = Some(watcher);

        let entries = std::fs::read_dir(&path).map_err(|e| {
            *slot.status.write().unwrap() = SlotStatus::Error;
            DeckError::Disk(format!("cannot read {}: {e}", path.display()))
        })?;

        for entry in entries.flatten() {
            let entry_path = entry.path();
            if !entry_path.is_file() {
                continue;
            }
            slot.probe_and_add(&entry_path).await;
        }

        *slot.status.write().unwrap() = SlotStatus::Mounted;
        info!(
            slot = id,
            path = %path.display(),
            clips = slot.clips.read().unwrap().len(),
            "slot mounted"
        );

        let watcher_slot = Arc::clone(&slot);
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                watcher_slot.apply_change(change).await;
            }
        });

        Ok(slot)
    }

    /// React to one filesystem change: created/modified files are
    /// re-probed and added or overwritten; removed/renamed files are
    /// dropped by base filename.
    pub async fn apply_change(&self, change: FsChange) {
        match change {
            FsChange::Created(p) | FsChange::Modified(p) => {
                if p.is_file() {
                    self.probe_and_add(&p).await;
                }
            }
            FsChange::Removed(p) | FsChange::Renamed(p) => {
                if let Some(name) = p.file_name() {
                    self.remove_clip(&name.to_string_lossy());
                }
            }
        }
    }

    async fn probe_and_add(&self, path: &Path) {
        let Some(name) = path.file_name() else { return };
        let name = name.to_string_lossy().into_owned();

        match self.engine.probe(path).await {
            Ok((handle, duration)) => {
                self.add_clip(DiskClip {
                    name,
                    path: path.to_path_buf(),
                    duration: Timecode::from_duration(duration, self.rate),
                    handle,
                });
            }
            Err(e) => {
                // A bad file must never block the rest of the catalog.
                warn!(path = %path.display(), "skipping clip: {e}");
            }
        }
    }

    /// Add a clip, overwriting in place when the name already exists.
    pub fn add_clip(&self, clip: DiskClip) {
        let mut clips = self.clips.write().unwrap();
        if let Some(existing) = clips.iter_mut().find(|c| c.name == clip.name) {
            *existing = clip;
            return;
        }
        clips.push(clip);
        clips.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Remove a clip by its base filename. Unknown names are ignored;
    /// the watcher reports removals for files we never cataloged.
    pub fn remove_clip(&self, name: &str) {
        let mut clips = self.clips.write().unwrap();
        clips.retain(|c| c.name != name);
    }

    /// Snapshot of the catalog, sorted by name.
    pub fn clips(&self) -> Vec<DiskClip> {
        self.clips.read().unwrap().clone()
    }

    pub fn find_clip(&self, name: &str) -> Option<DiskClip> {
        self.clips
            .read()
            .unwrap()
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn status(&self) -> SlotStatus {
        *self.status.read().unwrap()
    }

    pub fn volume_name(&self) -> &str {
        &self.volume_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ── Tests ────────────────────────────────────────────────────────
