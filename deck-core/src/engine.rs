//! Collaborator seams: the media engine and the display surface.
//!
//! The deck core never decodes or renders media itself. It drives a
//! [`MediaEngine`] through a narrow capability interface and receives
//! end-of-media / position events back through a broadcast channel.
//! [`SimulatedEngine`] is a wall-clock implementation used for
//! development and tests, so automation software can be exercised with
//! no real playback stack behind the deck.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::DeckError;

// ── Events ───────────────────────────────────────────────────────

/// Events delivered by the engine from its own execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// The loaded media played to its end.
    EndReached,
    /// Playback position changed; payload is elapsed milliseconds
    /// within the loaded media.
    PositionChanged(u64),
}

// ── MediaHandle ──────────────────────────────────────────────────

/// Opaque token for media the engine has probed. The engine owns the
/// underlying resource; the deck only ever passes the handle back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaHandle(u64);

impl MediaHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

// ── MediaEngine ──────────────────────────────────────────────────

/// The playback engine the deck drives.
///
/// `position_millis` returns `Ok(None)` when there is no active input
/// (nothing loaded yet); callers treat that as position zero, not an
/// error.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Probe a file for readiness and duration, returning a handle for
    /// later loading.
    async fn probe(&self, path: &Path) -> Result<(MediaHandle, Duration), DeckError>;

    /// Make previously probed media the engine's current media, paused
    /// at its start.
    async fn load(&self, handle: MediaHandle) -> Result<(), DeckError>;

    /// Replace the current media with synthesized blank material.
    async fn load_blank(&self) -> Result<(), DeckError>;

    async fn play(&self) -> Result<(), DeckError>;

    async fn pause(&self) -> Result<(), DeckError>;

    /// Set the playback rate (1.0 = normal). Reverse rates are not
    /// supported.
    async fn set_rate(&self, rate: f32) -> Result<(), DeckError>;

    async fn seek_millis(&self, millis: u64) -> Result<(), DeckError>;

    fn rate(&self) -> f32;

    fn is_playing(&self) -> bool;

    /// Whether any media (clip or blank) is currently loaded.
    fn has_media(&self) -> bool;

    /// Whether the current media has played to its end.
    fn is_ended(&self) -> bool;

    /// Elapsed milliseconds within the current media, or `None` when
    /// no input is active.
    fn position_millis(&self) -> Result<Option<u64>, DeckError>;

    /// Subscribe to engine events.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}

// ── DisplaySurface ───────────────────────────────────────────────

/// The output surface the engine renders into. The core only attaches
/// it and hides the pointer; everything else is the surface's problem.
pub trait DisplaySurface: Send + Sync {
    fn attach(&self) -> Result<(), DeckError>;
    fn hide_cursor(&self) -> Result<(), DeckError>;
}

// ── SimulatedEngine ──────────────────────────────────────────────

#[derive(Debug)]
struct Loaded {
    duration: Option<Duration>, // None = endless (blank)
    base_millis: f64,
    resumed_at: Option<Instant>,
    ended: bool,
}

impl Loaded {
    fn position_millis(&self, rate: f32) -> u64 {
        let mut pos = self.base_millis;
        if let Some(at) = self.resumed_at {
            pos += at.elapsed().as_millis() as f64 * rate as f64;
        }
        if let Some(dur) = self.duration {
            pos = pos.min(dur.as_millis() as f64);
        }
        pos as u64
    }
}

#[derive(Debug)]
struct EngineInner {
    next_id: u64,
    durations: HashMap<u64, Duration>,
    loaded: Option<Loaded>,
    rate: f32,
}

/// A clock-driven stand-in for a real playback engine.
///
/// Probing succeeds for any existing file with a fixed default
/// duration; position advances with wall-clock time scaled by the
/// playback rate; a ticker task emits [`EngineEvent::PositionChanged`]
/// while playing and [`EngineEvent::EndReached`] once past the loaded
/// duration.
pub struct SimulatedEngine {
    inner: Mutex<EngineInner>,
    events: broadcast::Sender<EngineEvent>,
    default_duration: Duration,
}

/// How often the ticker samples position while playing.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

impl SimulatedEngine {
    /// Create the engine and start its ticker task. Must be called
    /// from within a tokio runtime.
    pub fn new(default_duration: Duration) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let engine = Arc::new(Self {
            inner: Mutex::new(EngineInner {
                next_id: 1,
                durations: HashMap::new(),
                loaded: None,
                rate: 1.0,
            }),
            events,
            default_duration,
        });

        let weak = Arc::downgrade(&engine);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                let Some(engine) = weak.upgrade() else { break };
                engine.tick();
            }
        });

        engine
    }

    /// Register media with an explicit duration, bypassing `probe`.
    /// Lets tests model clips of differing lengths.
    pub fn register(&self, duration: Duration) -> MediaHandle {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.durations.insert(id, duration);
        MediaHandle(id)
    }

    fn tick(&self) {
        let event = {
            let mut inner = self.inner.lock().unwrap();
            let rate = inner.rate;
            let Some(loaded) = inner.loaded.as_mut() else {
                return;
            };
            if loaded.resumed_at.is_none() || loaded.ended {
                return;
            }
            let pos = loaded.position_millis(rate);
            match loaded.duration {
                Some(dur) if pos >= dur.as_millis() as u64 => {
                    loaded.ended = true;
                    loaded.base_millis = dur.as_millis() as f64;
                    loaded.resumed_at = None;
                    EngineEvent::EndReached
                }
                _ => EngineEvent::PositionChanged(pos),
            }
        };
        // No subscribers is fine; the error only means nobody listens.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl MediaEngine for SimulatedEngine {
    async fn probe(&self, path: &Path) -> Result<(MediaHandle, Duration), DeckError> {
        if !path.is_file() {
            return Err(DeckError::Engine(format!(
                "cannot open media: {}",
                path.display()
            )));
        }
        let handle = self.register(self.default_duration);
        debug!(path = %path.display(), id = handle.id(), "probed media");
        Ok((handle, self.default_duration))
    }

    async fn load(&self, handle: MediaHandle) -> Result<(), DeckError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(&duration) = inner.durations.get(&handle.id()) else {
            return Err(DeckError::Engine(format!(
                "unknown media handle: {}",
                handle.id()
            )));
        };
        inner.loaded = Some(Loaded {
            duration: Some(duration),
            base_millis: 0.0,
            resumed_at: None,
            ended: false,
        });
        Ok(())
    }

    async fn load_blank(&self) -> Result<(), DeckError> {
        let mut inner = self.inner.lock().unwrap();
        inner.loaded = Some(Loaded {
            duration: None,
            base_millis: 0.0,
            resumed_at: None,
            ended: false,
        });
        Ok(())
    }

    async fn play(&self) -> Result<(), DeckError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(loaded) = inner.loaded.as_mut() else {
            return Err(DeckError::Engine("no media loaded".into()));
        };
        // Playing media that already ended is a no-op until it is
        // reloaded, matching real player behavior.
        if !loaded.ended && loaded.resumed_at.is_none() {
            loaded.resumed_at = Some(Instant::now());
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), DeckError> {
        let mut inner = self.inner.lock().unwrap();
        let rate = inner.rate;
        if let Some(loaded) = inner.loaded.as_mut() {
            if loaded.resumed_at.is_some() {
                loaded.base_millis = loaded.position_millis(rate) as f64;
                loaded.resumed_at = None;
            }
        }
        Ok(())
    }

    async fn set_rate(&self, rate: f32) -> Result<(), DeckError> {
        if !(0.0..=16.0).contains(&rate) {
            return Err(DeckError::OutOfRange);
        }
        let mut inner = self.inner.lock().unwrap();
        let old_rate = inner.rate;
        if let Some(loaded) = inner.loaded.as_mut() {
            // Bank elapsed time at the old rate before switching.
            if loaded.resumed_at.is_some() {
                loaded.base_millis = loaded.position_millis(old_rate) as f64;
                loaded.resumed_at = Some(Instant::now());
            }
        }
        inner.rate = rate;
        Ok(())
    }

    async fn seek_millis(&self, millis: u64) -> Result<(), DeckError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(loaded) = inner.loaded.as_mut() else {
            return Err(DeckError::Engine("no media loaded".into()));
        };
        loaded.base_millis = millis as f64;
        if let Some(at) = loaded.resumed_at.as_mut() {
            *at = Instant::now();
        }
        loaded.ended = match loaded.duration {
            Some(dur) => millis >= dur.as_millis() as u64,
            None => false,
        };
        Ok(())
    }

    fn rate(&self) -> f32 {
        self.inner.lock().unwrap().rate
    }

    fn is_playing(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .loaded
            .as_ref()
            .is_some_and(|l| l.resumed_at.is_some() && !l.ended)
    }

    fn has_media(&self) -> bool {
        self.inner.lock().unwrap().loaded.is_some()
    }

    fn is_ended(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .loaded
            .as_ref()
            .is_some_and(|l| l.ended)
    }

    fn position_millis(&self) -> Result<Option<u64>, DeckError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .loaded
            .as_ref()
            .map(|l| l.position_millis(inner.rate)))
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

// ── Tests ────────────────────────────────────────────────────────
