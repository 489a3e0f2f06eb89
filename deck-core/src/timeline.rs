//! The transport state machine: an ordered playlist driven through the
//! media engine.
//!
//! All transport state lives under one async mutex. End-of-media events
//! arrive from the engine's own execution context and are funnelled
//! through [`TimelinePlayer::on_end_reached`], which takes the same
//! lock before mutating anything. Transport changes schedule a
//! `508 transport info:` push a short settle delay later.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::engine::{EngineEvent, MediaEngine, MediaHandle};
use crate::error::DeckError;
use crate::protocol::{status, Command};
use crate::server::Pusher;
use crate::slot::DiskClip;
use crate::timecode::{Rate, Timecode};

/// Settle delay before the transport-info push that follows a
/// transport change, giving the engine time to reach its new state.
const PUSH_SETTLE_DELAY: Duration = Duration::from_millis(100);

// ── StopMode ─────────────────────────────────────────────────────

/// What the output shows once the final clip has played out and loop
/// is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Hold the final frame of the last clip.
    LastFrame,
    /// Load the next clip paused on its first frame; falls back to
    /// black when there is no next clip.
    NextFrame,
    /// Switch to synthesized blank output.
    #[default]
    Black,
}

// ── TimelineClip ─────────────────────────────────────────────────

/// One playlist entry. `start` is the cumulative duration of every
/// entry before it, recomputed on any mutation of the list.
#[derive(Debug, Clone)]
pub struct TimelineClip {
    pub name: String,
    pub handle: MediaHandle,
    pub duration: Timecode,
    pub start: Timecode,
    /// Optional trim: playback begins here instead of frame zero.
    pub in_point: Option<Timecode>,
    /// Optional trim: the entry's contribution ends here.
    pub out_point: Option<Timecode>,
}

impl TimelineClip {
    pub fn new(name: impl Into<String>, handle: MediaHandle, duration: Timecode) -> Self {
        Self {
            name: name.into(),
            handle,
            duration,
            start: Timecode::zero(duration.rate()),
            in_point: None,
            out_point: None,
        }
    }

    /// Frames this entry contributes to the timeline, trims applied.
    fn effective_frames(&self) -> u64 {
        let end = self.out_point.unwrap_or(self.duration).frames();
        let start = self.in_point.map_or(0, |t| t.frames());
        end.saturating_sub(start)
    }
}

impl From<&DiskClip> for TimelineClip {
    fn from(clip: &DiskClip) -> Self {
        Self::new(clip.name.clone(), clip.handle, clip.duration)
    }
}

// ── TimelinePlayer ───────────────────────────────────────────────

#[derive(Debug)]
struct TimelineState {
    clips: Vec<TimelineClip>,
    /// 1-indexed; meaningful only while `clips` is non-empty.
    clip_id: usize,
    loop_enabled: bool,
    single_clip: bool,
    stop_mode: StopMode,
    /// The engine is showing synthesized blank material.
    blanked: bool,
}

/// The transport state machine over a playlist of clip references.
pub struct TimelinePlayer {
    engine: Arc<dyn MediaEngine>,
    rate: Rate,
    state: Mutex<TimelineState>,
    pusher: Pusher,
    // Handle to self for the tasks spawned off transport changes.
    weak_self: Weak<TimelinePlayer>,
}

impl TimelinePlayer {
    /// Create the player and start its end-of-media listener task.
    /// Must be called from within a tokio runtime.
    pub fn new(engine: Arc<dyn MediaEngine>, rate: Rate, pusher: Pusher) -> Arc<Self> {
        let player = Arc::new_cyclic(|weak| Self {
            engine,
            rate,
            state: Mutex::new(TimelineState {
                clips: Vec::new(),
                clip_id: 1,
                loop_enabled: false,
                single_clip: false,
                stop_mode: StopMode::default(),
                blanked: false,
            }),
            pusher,
            weak_self: weak.clone(),
        });

        let mut events = player.engine.subscribe();
        let weak = Arc::downgrade(&player);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(EngineEvent::EndReached) => {
                        let Some(player) = weak.upgrade() else { break };
                        player.on_end_reached().await;
                    }
                    Ok(EngineEvent::PositionChanged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "timeline lagged behind engine events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        player
    }

    // ── Transport ────────────────────────────────────────────────

    /// Start playback. If the output is blanked or the previous clip
    /// already played out, the current clip is reloaded at time zero
    /// first.
    pub async fn play(&self) -> Result<(), DeckError> {
        let mut state = self.state.lock().await;
        if state.clips.is_empty() {
            return Err(DeckError::TimelineEmpty);
        }
        if state.blanked || self.engine.is_ended() {
            self.load_current(&state).await?;
            state.blanked = false;
        }
        self.engine.play().await?;
        drop(state);
        self.schedule_push();
        Ok(())
    }

    /// Pause in place, holding the current frame.
    pub async fn stop(&self) -> Result<(), DeckError> {
        self.engine.pause().await?;
        self.schedule_push();
        Ok(())
    }

    /// Load clip `id` at time zero and start playing it.
    pub async fn play_clip(&self, id: usize) -> Result<(), DeckError> {
        let mut state = self.state.lock().await;
        if id < 1 || id > state.clips.len() {
            return Err(DeckError::OutOfRange);
        }
        state.clip_id = id;
        state.blanked = false;
        self.load_current(&state).await?;
        self.engine.play().await?;
        drop(state);
        self.schedule_push();
        Ok(())
    }

    /// Move the playhead to the following clip without forcing
    /// playback; playing state is preserved across the move.
    pub async fn next(&self) -> Result<(), DeckError> {
        self.step(1).await
    }

    /// Move the playhead to the preceding clip; see [`Self::next`].
    pub async fn previous(&self) -> Result<(), DeckError> {
        self.step(-1).await
    }

    async fn step(&self, delta: isize) -> Result<(), DeckError> {
        let mut state = self.state.lock().await;
        if state.clips.is_empty() {
            return Err(DeckError::TimelineEmpty);
        }
        let target = state.clip_id as isize + delta;
        if target < 1 || target > state.clips.len() as isize {
            return Err(DeckError::OutOfRange);
        }
        let was_playing = self.engine.is_playing();
        state.clip_id = target as usize;
        state.blanked = false;
        self.load_current(&state).await?;
        if was_playing {
            self.engine.play().await?;
        }
        drop(state);
        self.schedule_push();
        Ok(())
    }

    /// Switch the output to synthesized blank material and keep it
    /// running. The transport reports "stopped" while blanked.
    pub async fn stop_on_black(&self) -> Result<(), DeckError> {
        let mut state = self.state.lock().await;
        self.engine.load_blank().await?;
        self.engine.play().await?;
        state.blanked = true;
        drop(state);
        self.schedule_push();
        Ok(())
    }

    /// React to the engine reaching the end of the loaded media.
    /// Called from the listener task; also callable directly in tests.
    pub async fn on_end_reached(&self) {
        if let Err(e) = self.handle_end_reached().await {
            warn!("end-of-media handling failed: {e}");
        }
        self.schedule_push();
    }

    async fn handle_end_reached(&self) -> Result<(), DeckError> {
        let mut state = self.state.lock().await;
        if state.clips.is_empty() {
            return Ok(());
        }
        let no_next = state.clip_id >= state.clips.len();

        if state.single_clip || no_next {
            if state.loop_enabled {
                if !state.single_clip {
                    state.clip_id = 1;
                }
                debug!(clip = state.clip_id, "looping");
                self.load_current(&state).await?;
                self.engine.play().await?;
                return Ok(());
            }
            return match state.stop_mode {
                StopMode::LastFrame => self.engine.pause().await,
                StopMode::NextFrame => {
                    if no_next {
                        self.engine.load_blank().await?;
                        self.engine.play().await?;
                        state.blanked = true;
                        Ok(())
                    } else {
                        state.clip_id += 1;
                        self.load_current(&state).await
                    }
                }
                StopMode::Black => {
                    self.engine.load_blank().await?;
                    self.engine.play().await?;
                    state.blanked = true;
                    Ok(())
                }
            };
        }

        // More clips remain: continue uninterrupted.
        state.clip_id += 1;
        debug!(clip = state.clip_id, "advancing");
        self.load_current(&state).await?;
        self.engine.play().await
    }

    /// Load the current clip into the engine, honoring its in trim.
    async fn load_current(&self, state: &TimelineState) -> Result<(), DeckError> {
        let clip = &state.clips[state.clip_id - 1];
        self.engine.load(clip.handle).await?;
        if let Some(in_point) = clip.in_point {
            self.engine
                .seek_millis(in_point.to_duration().as_millis() as u64)
                .await?;
        }
        Ok(())
    }

    // ── Position ─────────────────────────────────────────────────

    /// The timeline position: cumulative duration of all preceding
    /// clips plus the engine's elapsed time within the current one.
    /// Zero when nothing is loaded yet.
    pub async fn timecode(&self) -> Result<Timecode, DeckError> {
        let state = self.state.lock().await;
        if state.clips.is_empty() {
            return Ok(Timecode::zero(self.rate));
        }
        let Some(engine_millis) = self.engine.position_millis()? else {
            return Ok(Timecode::zero(self.rate));
        };
        let clip = &state.clips[state.clip_id - 1];
        let trim_millis = clip
            .in_point
            .map_or(0, |t| t.to_duration().as_millis() as u64);
        let elapsed = Duration::from_millis(engine_millis.saturating_sub(trim_millis));
        Ok(clip.start + elapsed)
    }

    /// "play", "forward", or "stopped". Blanked output reports
    /// "stopped" even though the engine keeps running blank material.
    pub async fn transport_status(&self) -> &'static str {
        let state = self.state.lock().await;
        if state.blanked || !self.engine.is_playing() {
            "stopped"
        } else if self.engine.rate() > 1.0 {
            "forward"
        } else {
            "play"
        }
    }

    /// Playback speed in hundredths of normal; zero while stopped.
    pub async fn transport_speed(&self) -> i64 {
        let state = self.state.lock().await;
        if state.blanked || !self.engine.is_playing() {
            0
        } else {
            (self.engine.rate() * 100.0).round() as i64
        }
    }

    // ── Playlist mutation ────────────────────────────────────────

    /// Append a clip. If the engine has nothing loaded yet this clip
    /// becomes its current media, paused at its start.
    pub async fn add_clip(&self, clip: TimelineClip) -> Result<(), DeckError> {
        let mut state = self.state.lock().await;
        state.clips.push(clip);
        Self::recompute_starts(&mut state, self.rate);
        if !self.engine.has_media() {
            self.load_current(&state).await?;
        }
        Ok(())
    }

    /// Splice a clip in before `before_id` (1-indexed). The playhead
    /// keeps pointing at the entry it was on.
    pub async fn insert_clip(&self, clip: TimelineClip, before_id: usize) -> Result<(), DeckError> {
        let mut state = self.state.lock().await;
        if before_id < 1 || before_id > state.clips.len() + 1 {
            return Err(DeckError::OutOfRange);
        }
        state.clips.insert(before_id - 1, clip);
        if before_id <= state.clip_id {
            state.clip_id += 1;
        }
        Self::recompute_starts(&mut state, self.rate);
        Ok(())
    }

    /// Empty the playlist. Clip media is owned by the engine, so
    /// dropping the references is all that is needed.
    pub async fn clear_clips(&self) {
        let mut state = self.state.lock().await;
        state.clips.clear();
        state.clip_id = 1;
    }

    fn recompute_starts(state: &mut TimelineState, rate: Rate) {
        let mut acc = 0u64;
        for clip in &mut state.clips {
            clip.start = Timecode::new(acc, rate);
            acc += clip.effective_frames();
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub async fn set_loop(&self, enabled: bool) {
        self.state.lock().await.loop_enabled = enabled;
    }

    pub async fn set_single_clip(&self, enabled: bool) {
        self.state.lock().await.single_clip = enabled;
    }

    pub async fn set_stop_mode(&self, mode: StopMode) {
        self.state.lock().await.stop_mode = mode;
    }

    pub async fn loop_enabled(&self) -> bool {
        self.state.lock().await.loop_enabled
    }

    pub async fn single_clip(&self) -> bool {
        self.state.lock().await.single_clip
    }

    pub async fn clip_id(&self) -> usize {
        self.state.lock().await.clip_id
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.clips.len()
    }

    pub async fn clips(&self) -> Vec<TimelineClip> {
        self.state.lock().await.clips.clone()
    }

    pub async fn is_blanked(&self) -> bool {
        self.state.lock().await.blanked
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    // ── Async pushes ─────────────────────────────────────────────

    /// Snapshot the transport fields carried by the `508` push.
    pub async fn transport_push(&self) -> Command {
        let mut cmd = Command::new(status::ASYNC_TRANSPORT_INFO);
        cmd.push("status", self.transport_status().await);
        cmd.push("speed", self.transport_speed().await.to_string());
        let state = self.state.lock().await;
        cmd.push("loop", bool_str(state.loop_enabled));
        cmd.push("single clip", bool_str(state.single_clip));
        cmd.push("clip id", state.clip_id.to_string());
        cmd
    }

    fn schedule_push(&self) {
        let Some(player) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(PUSH_SETTLE_DELAY).await;
            let push = player.transport_push().await;
            player.pusher.send(push.marshall()).await;
        });
    }
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimulatedEngine;
    use crate::timecode::RATE_25;

    struct Rig {
        engine: Arc<SimulatedEngine>,
        player: Arc<TimelinePlayer>,
    }

    fn rig() -> Rig {
        let engine = SimulatedEngine::new(Duration::from_secs(10));
        let player = TimelinePlayer::new(
            Arc::clone(&engine) as Arc<dyn MediaEngine>,
            RATE_25,
            Pusher::default(),
        );
        Rig { engine, player }
    }

    async fn add(rig: &Rig, name: &str, secs: u64) {
        let handle = rig.engine.register(Duration::from_secs(secs));
        let duration = Timecode::from_duration(Duration::from_secs(secs), RATE_25);
        rig.player
            .add_clip(TimelineClip::new(name, handle, duration))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn play_empty_timeline_fails() {
        let rig = rig();
        assert!(matches!(
            rig.player.play().await,
            Err(DeckError::TimelineEmpty)
        ));
    }

    #[tokio::test]
    async fn play_and_stop() {
        let rig = rig();
        add(&rig, "a.mp4", 10).await;

        rig.player.play().await.unwrap();
        assert!(rig.engine.is_playing());
        assert_eq!(rig.player.transport_status().await, "play");

        rig.player.stop().await.unwrap();
        assert!(!rig.engine.is_playing());
        assert_eq!(rig.player.transport_status().await, "stopped");
        assert_eq!(rig.player.transport_speed().await, 0);
    }

    #[tokio::test]
    async fn play_clip_bounds() {
        let rig = rig();
        add(&rig, "a.mp4", 10).await;
        add(&rig, "b.mp4", 10).await;

        assert!(matches!(
            rig.player.play_clip(0).await,
            Err(DeckError::OutOfRange)
        ));
        assert!(matches!(
            rig.player.play_clip(3).await,
            Err(DeckError::OutOfRange)
        ));

        rig.player.play_clip(2).await.unwrap();
        assert_eq!(rig.player.clip_id().await, 2);
        assert!(rig.engine.is_playing());
    }

    #[tokio::test]
    async fn next_previous_within_bounds() {
        let rig = rig();
        add(&rig, "a.mp4", 10).await;
        add(&rig, "b.mp4", 10).await;

        assert!(matches!(
            rig.player.previous().await,
            Err(DeckError::OutOfRange)
        ));
        rig.player.next().await.unwrap();
        assert_eq!(rig.player.clip_id().await, 2);
        // Stepping never starts playback on its own.
        assert!(!rig.engine.is_playing());
        assert!(matches!(rig.player.next().await, Err(DeckError::OutOfRange)));
        assert_eq!(rig.player.clip_id().await, 2);
    }

    #[tokio::test]
    async fn end_of_media_advances_and_keeps_playing() {
        let rig = rig();
        add(&rig, "a.mp4", 10).await;
        add(&rig, "b.mp4", 10).await;
        rig.player.play().await.unwrap();

        rig.player.on_end_reached().await;
        assert_eq!(rig.player.clip_id().await, 2);
        assert!(rig.engine.is_playing());
        assert_eq!(rig.player.transport_status().await, "play");
    }

    #[tokio::test]
    async fn single_clip_loop_replays_same_clip() {
        let rig = rig();
        add(&rig, "a.mp4", 10).await;
        add(&rig, "b.mp4", 10).await;
        rig.player.set_single_clip(true).await;
        rig.player.set_loop(true).await;
        rig.player.play().await.unwrap();

        rig.player.on_end_reached().await;
        assert_eq!(rig.player.clip_id().await, 1);
        assert!(rig.engine.is_playing());
    }

    #[tokio::test]
    async fn loop_restarts_at_first_clip_after_last() {
        let rig = rig();
        add(&rig, "a.mp4", 10).await;
        add(&rig, "b.mp4", 10).await;
        rig.player.set_loop(true).await;
        rig.player.play_clip(2).await.unwrap();

        rig.player.on_end_reached().await;
        assert_eq!(rig.player.clip_id().await, 1);
        assert!(rig.engine.is_playing());
    }

    #[tokio::test]
    async fn stop_mode_black_blanks_after_last_clip() {
        let rig = rig();
        add(&rig, "a.mp4", 10).await;
        rig.player.play().await.unwrap();

        rig.player.on_end_reached().await;
        assert!(rig.player.is_blanked().await);
        // The engine keeps running blank material, but the transport
        // reports stopped.
        assert!(rig.engine.is_playing());
        assert_eq!(rig.player.transport_status().await, "stopped");
    }

    #[tokio::test]
    async fn stop_mode_last_frame_pauses_in_place() {
        let rig = rig();
        add(&rig, "a.mp4", 10).await;
        rig.player.set_stop_mode(StopMode::LastFrame).await;
        rig.player.play().await.unwrap();

        rig.player.on_end_reached().await;
        assert!(!rig.player.is_blanked().await);
        assert!(!rig.engine.is_playing());
        assert_eq!(rig.player.transport_status().await, "stopped");
    }

    #[tokio::test]
    async fn stop_mode_next_frame_loads_next_paused() {
        let rig = rig();
        add(&rig, "a.mp4", 10).await;
        add(&rig, "b.mp4", 10).await;
        rig.player.set_stop_mode(StopMode::NextFrame).await;
        rig.player.set_single_clip(true).await;
        rig.player.play().await.unwrap();

        rig.player.on_end_reached().await;
        assert_eq!(rig.player.clip_id().await, 2);
        assert!(!rig.engine.is_playing());
        assert!(!rig.player.is_blanked().await);
    }

    #[tokio::test]
    async fn play_after_blank_reloads_current_clip() {
        let rig = rig();
        add(&rig, "a.mp4", 10).await;
        rig.player.stop_on_black().await.unwrap();
        assert!(rig.player.is_blanked().await);

        rig.player.play().await.unwrap();
        assert!(!rig.player.is_blanked().await);
        assert_eq!(rig.player.transport_status().await, "play");
    }

    #[tokio::test]
    async fn timecode_accumulates_preceding_durations() {
        let rig = rig();
        add(&rig, "a.mp4", 60).await;
        add(&rig, "b.mp4", 30).await;
        rig.player.play_clip(2).await.unwrap();

        // Clip 2 starts one minute in at 25 fps.
        let tc = rig.player.timecode().await.unwrap();
        assert_eq!(tc.to_string(), "00:01:00:00");
    }

    #[tokio::test]
    async fn timecode_zero_without_active_input() {
        let rig = rig();
        let tc = rig.player.timecode().await.unwrap();
        assert_eq!(tc.frames(), 0);
    }

    #[tokio::test]
    async fn insert_recomputes_starts_and_keeps_playhead() {
        let rig = rig();
        add(&rig, "b.mp4", 30).await;
        add(&rig, "c.mp4", 30).await;
        rig.player.play_clip(2).await.unwrap();

        let handle = rig.engine.register(Duration::from_secs(10));
        let duration = Timecode::from_duration(Duration::from_secs(10), RATE_25);
        rig.player
            .insert_clip(TimelineClip::new("a.mp4", handle, duration), 1)
            .await
            .unwrap();

        // The playhead still points at "c.mp4", whose start moved.
        assert_eq!(rig.player.clip_id().await, 3);
        let clips = rig.player.clips().await;
        assert_eq!(clips[0].start.frames(), 0);
        assert_eq!(clips[1].start.frames(), 250);
        assert_eq!(clips[2].start.frames(), 250 + 750);
    }

    #[tokio::test]
    async fn transport_push_carries_transport_fields() {
        let rig = rig();
        add(&rig, "a.mp4", 10).await;
        rig.player.set_loop(true).await;
        rig.player.play().await.unwrap();

        let push = rig.player.transport_push().await;
        let text = push.marshall();
        assert!(text.starts_with("508 transport info:\r\n"));
        assert!(text.contains("status: play\r\n"));
        assert!(text.contains("speed: 100\r\n"));
        assert!(text.contains("loop: true\r\n"));
        assert!(text.contains("single clip: false\r\n"));
        assert!(text.contains("clip id: 1\r\n"));
    }
}
