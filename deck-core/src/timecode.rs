//! Frame-accurate timecode at a fixed frame rate.
//!
//! A [`Timecode`] is a frame count plus a [`Rate`]. Formatting follows
//! SMPTE conventions: `HH:MM:SS:FF`, with a `;` before the frame field
//! when the rate is drop-frame. Addition combines frame counts at a
//! shared rate; mixing rates is rejected.

use std::fmt;
use std::ops::Add;
use std::time::Duration;

use crate::error::DeckError;

// ── Rate ─────────────────────────────────────────────────────────

/// A frame rate: nominal frames per second plus a drop-frame flag.
///
/// Drop-frame rates run at `fps * 1000/1001` real frames per second
/// (59.94 for nominal 60) and skip frame *numbers* to stay in sync
/// with wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rate {
    /// Nominal frames per second (30 for 29.97 DF, 60 for 59.94 DF).
    pub fps: u32,
    /// Whether this is a drop-frame rate.
    pub drop_frame: bool,
}

/// 59.94 fps drop-frame, the rate of 720p59.94 material.
pub const RATE_60_DF: Rate = Rate {
    fps: 60,
    drop_frame: true,
};

/// 25 fps non-drop (PAL).
pub const RATE_25: Rate = Rate {
    fps: 25,
    drop_frame: false,
};

impl Rate {
    /// Convert a wall-clock duration into a frame count at this rate.
    pub fn frames_in(&self, d: Duration) -> u64 {
        let millis = d.as_millis() as u64;
        if self.drop_frame {
            // real rate is fps * 1000/1001
            millis * self.fps as u64 / 1001
        } else {
            millis * self.fps as u64 / 1000
        }
    }
}

// ── Timecode ─────────────────────────────────────────────────────

/// A frame-accurate position or duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timecode {
    frames: u64,
    rate: Rate,
}

impl Timecode {
    /// A timecode at a raw frame count.
    pub fn new(frames: u64, rate: Rate) -> Self {
        Self { frames, rate }
    }

    /// Zero at the given rate.
    pub fn zero(rate: Rate) -> Self {
        Self { frames: 0, rate }
    }

    /// Convert a wall-clock duration into a timecode at `rate`.
    pub fn from_duration(d: Duration, rate: Rate) -> Self {
        Self {
            frames: rate.frames_in(d),
            rate,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The wall-clock duration this frame count spans at its rate.
    /// Inverse of [`Rate::frames_in`] up to millisecond truncation.
    pub fn to_duration(&self) -> Duration {
        let fps = self.rate.fps as u64;
        let millis = if self.rate.drop_frame {
            self.frames * 1001 / fps
        } else {
            self.frames * 1000 / fps
        };
        Duration::from_millis(millis)
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    /// Add two timecodes. Fails with [`DeckError::RateMismatch`] when
    /// the rates differ; there is no meaningful frame count across
    /// mixed rates.
    pub fn checked_add(self, other: Timecode) -> Result<Timecode, DeckError> {
        if self.rate != other.rate {
            return Err(DeckError::RateMismatch(self.rate.fps, other.rate.fps));
        }
        Ok(Timecode {
            frames: self.frames + other.frames,
            rate: self.rate,
        })
    }

    /// Drop-frame correction: map a real frame count onto the SMPTE
    /// frame *number* sequence, which skips `fps/15` numbers at the
    /// start of every minute not divisible by ten.
    fn display_fields(&self) -> (u64, u64, u64, u64) {
        let fps = self.rate.fps as u64;
        let mut frame = self.frames;
        if self.rate.drop_frame {
            let drop = fps / 15; // 2 at 30 fps, 4 at 60 fps
            let per_min = 60 * fps - drop;
            let per_ten_min = 10 * per_min + drop;
            let tens = frame / per_ten_min;
            let rem = frame % per_ten_min;
            frame += 9 * drop * tens;
            if rem > drop {
                frame += drop * ((rem - drop) / per_min);
            }
        }
        let ff = frame % fps;
        let secs = frame / fps;
        (secs / 3600, (secs / 60) % 60, secs % 60, ff)
    }
}

impl Add<Duration> for Timecode {
    type Output = Timecode;

    fn add(self, d: Duration) -> Timecode {
        Timecode {
            frames: self.frames + self.rate.frames_in(d),
            rate: self.rate,
        }
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hh, mm, ss, ff) = self.display_fields();
        let sep = if self.rate.drop_frame { ';' } else { ':' };
        write!(f, "{hh:02}:{mm:02}:{ss:02}{sep}{ff:02}")
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_formats() {
        assert_eq!(Timecode::zero(RATE_25).to_string(), "00:00:00:00");
        assert_eq!(Timecode::zero(RATE_60_DF).to_string(), "00:00:00;00");
    }

    #[test]
    fn non_drop_formatting() {
        // 25 fps: 1 hour = 90_000 frames
        let tc = Timecode::new(90_000 + 25 * 61 + 5, RATE_25);
        assert_eq!(tc.to_string(), "01:01:01:05");
    }

    #[test]
    fn drop_frame_skips_numbers_at_minute() {
        // At 60 DF the display jumps from 00:00:59;59 straight to
        // 00:01:00;04, since frame numbers 0..3 of minute one are dropped.
        let before = Timecode::new(3599, RATE_60_DF);
        let after = Timecode::new(3600, RATE_60_DF);
        assert_eq!(before.to_string(), "00:00:59;59");
        assert_eq!(after.to_string(), "00:01:00;04");
    }

    #[test]
    fn drop_frame_tenth_minute_not_skipped() {
        // Ten real minutes at 60 DF is 35_964 frames and lands exactly
        // on 00:10:00;00, where minute ten keeps its first frame numbers.
        let tc = Timecode::new(35_964, RATE_60_DF);
        assert_eq!(tc.to_string(), "00:10:00;00");
    }

    #[test]
    fn from_duration_counts_real_frames() {
        let tc = Timecode::from_duration(Duration::from_secs(1), RATE_25);
        assert_eq!(tc.frames(), 25);

        // 59.94: one wall second is 59 whole frames
        let tc = Timecode::from_duration(Duration::from_secs(1), RATE_60_DF);
        assert_eq!(tc.frames(), 59);
    }

    #[test]
    fn to_duration_round_trips_whole_seconds() {
        let tc = Timecode::new(25 * 90, RATE_25);
        assert_eq!(tc.to_duration(), Duration::from_secs(90));

        // 59.94: 60 nominal frames span just over one wall second
        let tc = Timecode::new(60, RATE_60_DF);
        assert_eq!(tc.to_duration(), Duration::from_millis(1001));
    }

    #[test]
    fn addition_same_rate() {
        let a = Timecode::new(10, RATE_25);
        let b = Timecode::new(15, RATE_25);
        assert_eq!(a.checked_add(b).unwrap().frames(), 25);
    }

    #[test]
    fn addition_mixed_rates_rejected() {
        let a = Timecode::new(10, RATE_25);
        let b = Timecode::new(10, RATE_60_DF);
        assert!(matches!(
            a.checked_add(b),
            Err(DeckError::RateMismatch(25, 60))
        ));
    }

    #[test]
    fn add_duration() {
        let tc = Timecode::new(100, RATE_25) + Duration::from_secs(2);
        assert_eq!(tc.frames(), 150);
    }
}
