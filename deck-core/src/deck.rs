//! The deck façade: command dispatch over the timeline, slots, and
//! collaborator seams.
//!
//! [`Deck`] is the only surface the connection manager sees, so the
//! whole deck behind a session is swappable. [`MediaDeck`] is the
//! production implementation: it owns the notify and remote flag sets,
//! the slot list, and the timeline player, and turns each parsed
//! [`Command`] into a response string. Command failures map to
//! protocol status lines; they never tear down the session.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::engine::{DisplaySurface, EngineEvent, MediaEngine};
use crate::error::DeckError;
use crate::protocol::{status, Command};
use crate::server::Pusher;
use crate::slot::Slot;
use crate::timecode::Rate;
use crate::timeline::{TimelineClip, TimelinePlayer};

pub const PROTOCOL_VERSION: &str = "1.11";

// ── Deck trait ───────────────────────────────────────────────────

/// The polymorphic seam between the connection manager and whatever
/// deck stands behind it.
#[async_trait]
pub trait Deck: Send + Sync {
    fn model(&self) -> &str;

    fn protocol_version(&self) -> &str;

    /// Execute one command and render its response. Never fails; every
    /// error becomes a protocol status line.
    async fn process_command(&self, cmd: &Command) -> String;

    /// Bring collaborators up (display surface, event fan-out).
    async fn power_on(&self) -> Result<(), DeckError>;

    /// Best-effort teardown; partial failures are logged, not raised.
    async fn power_off(&self);
}

// ── Flag sets ────────────────────────────────────────────────────

/// Which asynchronous notification classes the client asked for.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyFlags {
    pub transport: bool,
    pub slot: bool,
    pub remote: bool,
    pub configuration: bool,
    pub dropped_frames: bool,
    pub display_timecode: bool,
    pub timeline_position: bool,
    pub playrange: bool,
    pub cache: bool,
    pub dynamic_range: bool,
}

impl NotifyFlags {
    fn set(&mut self, name: &str, value: bool) -> Result<(), DeckError> {
        match name {
            "transport" => self.transport = value,
            "slot" => self.slot = value,
            "remote" => self.remote = value,
            "configuration" => self.configuration = value,
            "dropped frames" => self.dropped_frames = value,
            "display timecode" => self.display_timecode = value,
            "timeline position" => self.timeline_position = value,
            "playrange" => self.playrange = value,
            "cache" => self.cache = value,
            "dynamic range" => self.dynamic_range = value,
            other => return Err(DeckError::UnsupportedParameter(other.to_string())),
        }
        Ok(())
    }

    /// Flag names and values in wire order.
    fn fields(&self) -> [(&'static str, bool); 10] {
        [
            ("transport", self.transport),
            ("slot", self.slot),
            ("remote", self.remote),
            ("configuration", self.configuration),
            ("dropped frames", self.dropped_frames),
            ("display timecode", self.display_timecode),
            ("timeline position", self.timeline_position),
            ("playrange", self.playrange),
            ("cache", self.cache),
            ("dynamic range", self.dynamic_range),
        ]
    }
}

/// Remote-control gating. Transport commands are refused with
/// `111 remote control disabled` while `enabled` is off, unless
/// `override_enabled` bypasses the gate.
#[derive(Debug, Clone, Copy)]
pub struct RemoteFlags {
    pub enabled: bool,
    pub override_enabled: bool,
}

impl Default for RemoteFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            override_enabled: false,
        }
    }
}

// ── MediaDeck ────────────────────────────────────────────────────

/// The production deck.
pub struct MediaDeck {
    model: String,
    video_format: String,
    engine: Arc<dyn MediaEngine>,
    display: Option<Arc<dyn DisplaySurface>>,
    timeline: Arc<TimelinePlayer>,
    slots: RwLock<Vec<Arc<Slot>>>,
    /// 1-indexed selected slot; 0 means none.
    selected_slot: AtomicU32,
    notify: RwLock<NotifyFlags>,
    remote: RwLock<RemoteFlags>,
    pusher: Pusher,
}

impl MediaDeck {
    /// Build the deck and start its engine-event fan-out task. Must be
    /// called from within a tokio runtime.
    pub fn new(
        model: impl Into<String>,
        video_format: impl Into<String>,
        engine: Arc<dyn MediaEngine>,
        display: Option<Arc<dyn DisplaySurface>>,
        rate: Rate,
        pusher: Pusher,
    ) -> Arc<Self> {
        let timeline = TimelinePlayer::new(Arc::clone(&engine), rate, pusher.clone());
        let deck = Arc::new(Self {
            model: model.into(),
            video_format: video_format.into(),
            engine,
            display,
            timeline,
            slots: RwLock::new(Vec::new()),
            selected_slot: AtomicU32::new(0),
            notify: RwLock::new(NotifyFlags::default()),
            remote: RwLock::new(RemoteFlags::default()),
            pusher,
        });
        Self::spawn_event_fanout(&deck);
        deck
    }

    /// Attach a mounted slot and feed its catalog into the timeline.
    /// The first slot attached becomes the selected one.
    pub async fn attach_slot(&self, slot: Arc<Slot>) -> Result<(), DeckError> {
        for clip in slot.clips() {
            self.timeline.add_clip(TimelineClip::from(&clip)).await?;
        }
        let mut slots = self.slots.write().unwrap();
        slots.push(Arc::clone(&slot));
        if slots.len() == 1 {
            self.selected_slot.store(slot.id(), Ordering::SeqCst);
        }
        info!(slot = slot.id(), "slot attached");
        Ok(())
    }

    pub fn timeline(&self) -> &Arc<TimelinePlayer> {
        &self.timeline
    }

    fn slot_by_id(&self, id: u32) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .unwrap()
            .iter()
            .find(|s| s.id() == id)
            .cloned()
    }

    fn spawn_event_fanout(deck: &Arc<Self>) {
        let mut events = deck.engine.subscribe();
        let weak = Arc::downgrade(deck);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(EngineEvent::PositionChanged(_)) => {
                        let Some(deck) = weak.upgrade() else { break };
                        deck.push_position().await;
                    }
                    Ok(EngineEvent::EndReached) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Emit `513` / `514` pushes per the client's notify flags.
    async fn push_position(&self) {
        let flags = *self.notify.read().unwrap();
        if !flags.display_timecode && !flags.timeline_position {
            return;
        }
        let tc = match self.timeline.timecode().await {
            Ok(tc) => tc,
            Err(e) => {
                debug!("position push skipped: {e}");
                return;
            }
        };
        if flags.timeline_position {
            let mut cmd = Command::new(status::ASYNC_TIMELINE_POSITION);
            cmd.push("timeline", tc.frames().to_string());
            self.pusher.send(cmd.marshall()).await;
        }
        if flags.display_timecode {
            let mut cmd = Command::new(status::ASYNC_DISPLAY_TIMECODE);
            cmd.push("display timecode", tc.to_string());
            self.pusher.send(cmd.marshall()).await;
        }
    }

    fn check_remote(&self) -> Result<(), DeckError> {
        let remote = *self.remote.read().unwrap();
        if remote.enabled || remote.override_enabled {
            Ok(())
        } else {
            Err(DeckError::RemoteDisabled)
        }
    }

    // ── Command handlers ─────────────────────────────────────────

    async fn cmd_notify(&self, cmd: &Command) -> Result<String, DeckError> {
        if cmd.parameters().count() == 0 {
            let mut out = Command::new(status::NOTIFY_INFO);
            for (name, value) in self.notify.read().unwrap().fields() {
                out.push(name, bool_str(value));
            }
            return Ok(out.marshall());
        }

        let mut flags = *self.notify.read().unwrap();
        for (name, value) in cmd.parameters() {
            let value = parse_bool(value)?;
            flags.set(name, value)?;
        }
        // All-or-nothing: a bad flag name leaves every flag untouched.
        *self.notify.write().unwrap() = flags;
        Ok(status::OK.to_string())
    }

    async fn cmd_play(&self, cmd: &Command) -> Result<String, DeckError> {
        self.check_remote()?;

        if let Some(v) = cmd.get("singleClip") {
            self.timeline.set_single_clip(parse_bool(v)?).await;
        }
        if let Some(v) = cmd.get("loop") {
            self.timeline.set_loop(parse_bool(v)?).await;
        }

        if let Some(v) = cmd.get("speed") {
            let speed: i64 = v
                .parse()
                .map_err(|_| DeckError::Syntax(format!("bad speed: {v}")))?;
            if !(0..=1600).contains(&speed) {
                return Err(DeckError::OutOfRange);
            }
            if speed == 0 {
                self.timeline.stop().await?;
                return Ok(status::OK.to_string());
            }
            self.engine.set_rate(speed as f32 / 100.0).await?;
        }

        self.timeline.play().await?;
        Ok(status::OK.to_string())
    }

    async fn cmd_stop(&self) -> Result<String, DeckError> {
        self.check_remote()?;
        self.timeline.stop().await?;
        Ok(status::OK.to_string())
    }

    async fn cmd_goto(&self, cmd: &Command) -> Result<String, DeckError> {
        self.check_remote()?;
        let Some(target) = cmd.get("clip id") else {
            return Err(DeckError::UnsupportedParameter("clip id".to_string()));
        };

        if let Some(offset) = target.strip_prefix('+') {
            let steps: u64 = offset
                .parse()
                .map_err(|_| DeckError::Syntax(format!("bad clip id: {target}")))?;
            for _ in 0..steps {
                // A boundary error leaves the playhead where the last
                // successful step put it.
                self.timeline.next().await?;
            }
        } else if let Some(offset) = target.strip_prefix('-') {
            let steps: u64 = offset
                .parse()
                .map_err(|_| DeckError::Syntax(format!("bad clip id: {target}")))?;
            for _ in 0..steps {
                self.timeline.previous().await?;
            }
        } else {
            let id: usize = target
                .parse()
                .map_err(|_| DeckError::Syntax(format!("bad clip id: {target}")))?;
            self.timeline.play_clip(id).await?;
        }
        Ok(status::OK.to_string())
    }

    async fn cmd_clips_count(&self) -> Result<String, DeckError> {
        let mut out = Command::new(status::CLIPS_COUNT);
        out.push("clip count", self.timeline.count().await.to_string());
        Ok(out.marshall())
    }

    async fn cmd_clips_get(&self, cmd: &Command) -> Result<String, DeckError> {
        let clips = self.timeline.clips().await;

        let selection: Vec<(usize, &TimelineClip)> = match cmd.get("clip id") {
            Some(v) => {
                let id: usize = v
                    .parse()
                    .map_err(|_| DeckError::Syntax(format!("bad clip id: {v}")))?;
                if id < 1 || id > clips.len() {
                    return Err(DeckError::OutOfRange);
                }
                vec![(id, &clips[id - 1])]
            }
            None => clips.iter().enumerate().map(|(i, c)| (i + 1, c)).collect(),
        };

        let mut out = Command::new(status::CLIPS_INFO);
        out.push("clip count", selection.len().to_string());
        for (idx, clip) in selection {
            out.push(
                idx.to_string(),
                format!("{} {} {}", clip.name, clip.start, clip.duration),
            );
        }
        Ok(out.marshall())
    }

    async fn cmd_disk_list(&self, cmd: &Command) -> Result<String, DeckError> {
        let slot_id = match cmd.get("slot id") {
            Some(v) => v
                .parse()
                .map_err(|_| DeckError::InvalidValue(format!("bad slot id: {v}")))?,
            None => self.selected_slot.load(Ordering::SeqCst),
        };
        let slot = self.slot_by_id(slot_id).ok_or(DeckError::NoDisk)?;

        let mut out = Command::new(status::DISK_LIST);
        out.push("slot id", slot_id.to_string());
        for (idx, clip) in slot.clips().iter().enumerate() {
            out.push(
                (idx + 1).to_string(),
                format!(
                    "{} QuickTimeProResLT {} {}",
                    clip.name, self.video_format, clip.duration
                ),
            );
        }
        Ok(out.marshall())
    }

    async fn cmd_slot_info(&self, cmd: &Command) -> Result<String, DeckError> {
        let slot_id = match cmd.get("slot id") {
            Some(v) => v
                .parse()
                .map_err(|_| DeckError::InvalidValue(format!("bad slot id: {v}")))?,
            None => self.selected_slot.load(Ordering::SeqCst),
        };
        let slot = self.slot_by_id(slot_id).ok_or(DeckError::NoDisk)?;

        let mut out = Command::new(status::SLOT_INFO);
        out.push("slot id", slot_id.to_string());
        out.push("status", slot.status().as_str());
        out.push("volume name", slot.volume_name());
        out.push("recording time", "0");
        out.push("video format", &self.video_format);
        out.push("blocked", "false");
        Ok(out.marshall())
    }

    async fn cmd_transport_info(&self) -> Result<String, DeckError> {
        let tc = self.timeline.timecode().await?;
        let slot_id = self.selected_slot.load(Ordering::SeqCst);

        let mut out = Command::new(status::TRANSPORT_INFO);
        out.push("status", self.timeline.transport_status().await);
        out.push("speed", self.timeline.transport_speed().await.to_string());
        out.push(
            "slot id",
            if slot_id == 0 {
                "none".to_string()
            } else {
                slot_id.to_string()
            },
        );
        out.push("clip id", self.timeline.clip_id().await.to_string());
        out.push("single clip", bool_str(self.timeline.single_clip().await));
        out.push("display timecode", tc.to_string());
        out.push("timecode", tc.to_string());
        out.push("video format", &self.video_format);
        out.push("loop", bool_str(self.timeline.loop_enabled().await));
        out.push("timeline", tc.frames().to_string());
        out.push("input video format", "none");
        out.push("dynamic range", "none");
        Ok(out.marshall())
    }

    async fn cmd_remote(&self, cmd: &Command) -> Result<String, DeckError> {
        if cmd.parameters().count() == 0 {
            let remote = *self.remote.read().unwrap();
            let mut out = Command::new(status::REMOTE_INFO);
            out.push("enabled", bool_str(remote.enabled));
            out.push("override", bool_str(remote.override_enabled));
            return Ok(out.marshall());
        }

        let mut remote = *self.remote.read().unwrap();
        for (name, value) in cmd.parameters() {
            match name {
                "enable" => remote.enabled = parse_bool(value)?,
                "override" => remote.override_enabled = parse_bool(value)?,
                other => return Err(DeckError::UnsupportedParameter(other.to_string())),
            }
        }
        *self.remote.write().unwrap() = remote;
        Ok(status::OK.to_string())
    }

    fn cmd_help(&self) -> String {
        let mut out = String::from(status::HELP);
        out.push_str("\r\n");
        for name in [
            "help",
            "notify",
            "remote",
            "play",
            "stop",
            "goto",
            "clips count",
            "clips get",
            "disk list",
            "slot info",
            "transport info",
            "ping",
            "watchdog",
            "quit",
        ] {
            out.push_str(name);
            out.push_str("\r\n");
        }
        out
    }
}

#[async_trait]
impl Deck for MediaDeck {
    fn model(&self) -> &str {
        &self.model
    }

    fn protocol_version(&self) -> &str {
        PROTOCOL_VERSION
    }

    async fn process_command(&self, cmd: &Command) -> String {
        debug!(command = %cmd, "processing command");
        let result = match cmd.name() {
            "notify" => self.cmd_notify(cmd).await,
            "play" => self.cmd_play(cmd).await,
            "stop" => self.cmd_stop().await,
            "goto" => self.cmd_goto(cmd).await,
            "clips count" => self.cmd_clips_count().await,
            "clips get" => self.cmd_clips_get(cmd).await,
            "disk list" => self.cmd_disk_list(cmd).await,
            "slot info" => self.cmd_slot_info(cmd).await,
            "transport info" => self.cmd_transport_info().await,
            "remote" => self.cmd_remote(cmd).await,
            "help" => Ok(self.cmd_help()),
            other => {
                warn!(command = other, "unsupported command");
                Err(DeckError::Unsupported)
            }
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                debug!(command = cmd.name(), "command failed: {e}");
                e.status_line().to_string()
            }
        }
    }

    async fn power_on(&self) -> Result<(), DeckError> {
        if let Some(display) = &self.display {
            display.attach()?;
            display.hide_cursor()?;
        }
        info!(model = %self.model, "deck powered on");
        Ok(())
    }

    async fn power_off(&self) {
        if let Err(e) = self.timeline.stop().await {
            warn!("stopping timeline on power-off failed: {e}");
        }
        info!(model = %self.model, "deck powered off");
    }
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Strict protocol booleans: exactly "true" or "false".
fn parse_bool(s: &str) -> Result<bool, DeckError> {
    match s {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(DeckError::InvalidValue(format!("not a boolean: {other}"))),
    }
}

// ── Tests ────────────────────────────────────────────────────────
