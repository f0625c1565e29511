//! Derived products over a decoded replay.
//!
//! # Cut score
//!
//! ```text
//! approach      = clamp(beforeCutRating × 70, 0, 70)
//! followThrough = clamp(afterCutRating  × 30, 0, 30)
//! centerCut     = clamp(15 × (1 − clamp(distanceToCenter / 0.3, 0, 1)), 0, 15)
//! score         = clamp(round(approach + followThrough + centerCut), 0, 115)
//! ```
//!
//! # Swing speed
//!
//! For each pair of consecutive frames with a positive time step, each
//! hand's speed is `|Δposition| / Δtime` (metres per second).  The sample is
//! credited to the bucket holding the later frame's time, where bucket `k`
//! covers `[k·w, (k+1)·w)` of song time and `w` is the window width (2 s by
//! default).  A bucket's value is the mean of its samples.  Buckets run
//! contiguously from the first to the last one holding a sample; a bucket
//! with no samples reports `0`.
//!
//! Frame times come straight from the file.  Pairs with a non-finite time or
//! speed are skipped, as are samples whose bucket index falls outside the
//! exactly representable integer range of `f64`.  When the first-to-last span
//! exceeds [`MAX_SWING_BUCKETS`], the gaps are not filled and only the
//! populated buckets are reported, so the series never outgrows
//! `max(MAX_SWING_BUCKETS, frames)`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{CutInfo, Replay};

pub const MAX_CUT_SCORE: i32 = 115;
pub const DEFAULT_SWING_WINDOW: f32 = 2.0;
/// Largest gap-filled swing series; six hours at the default window.
pub const MAX_SWING_BUCKETS: usize = 10_800;

/// Bucket indices beyond this are not exact in `f64`.
const MAX_BUCKET_INDEX: f64 = 9.0e15;

/// Configuration for [`DecodedReplayResponse::from_replay`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyticsOptions {
    pub swing_window_seconds: f32,
}

impl Default for AnalyticsOptions {
    fn default() -> Self {
        Self { swing_window_seconds: DEFAULT_SWING_WINDOW }
    }
}

// ── Cut distribution ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutBucket {
    pub score: i32,
    pub count: u32,
}

pub fn cut_score(cut: &CutInfo) -> i32 {
    let approach = (cut.before_cut_rating * 70.0).clamp(0.0, 70.0);
    let follow_through = (cut.after_cut_rating * 30.0).clamp(0.0, 30.0);
    let center = (15.0 * (1.0 - (cut.cut_distance_to_center / 0.3).clamp(0.0, 1.0))).clamp(0.0, 15.0);
    // NaN ratings fall out of `clamp` as NaN; `as` maps NaN to 0.
    ((approach + follow_through + center).round() as i32).clamp(0, MAX_CUT_SCORE)
}

/// Histogram of cut scores over good and bad cuts, ascending by score.
pub fn cut_distribution(replay: &Replay) -> Vec<CutBucket> {
    let mut counts: BTreeMap<i32, u32> = BTreeMap::new();
    for note in &replay.notes {
        if !note.event_type.has_cut_info() {
            continue;
        }
        if let Some(cut) = &note.cut_info {
            *counts.entry(cut_score(cut)).or_default() += 1;
        }
    }
    counts.into_iter().map(|(score, count)| CutBucket { score, count }).collect()
}

// ── Swing speed ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingSpeedPoint {
    /// Start of the bucket in song seconds.
    pub time:  f32,
    pub left:  f32,
    pub right: f32,
}

#[derive(Default)]
struct Accum {
    left:  (f64, u32),
    right: (f64, u32),
}

fn mean((sum, n): (f64, u32)) -> f32 {
    if n == 0 { 0.0 } else { (sum / n as f64) as f32 }
}

pub fn swing_speed(replay: &Replay, window: f32) -> Vec<SwingSpeedPoint> {
    if !(window.is_finite() && window > 0.0) {
        return Vec::new();
    }
    let mut buckets: BTreeMap<i64, Accum> = BTreeMap::new();
    for pair in replay.frames.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if !(prev.time.is_finite() && cur.time.is_finite()) {
            continue;
        }
        let dt = cur.time - prev.time;
        if !(dt > 0.0) {
            continue;
        }
        let index = (cur.time as f64 / window as f64).floor();
        if !(index.abs() <= MAX_BUCKET_INDEX) {
            continue;
        }
        let left = cur.left.position.distance(&prev.left.position) / dt;
        let right = cur.right.position.distance(&prev.right.position) / dt;
        let acc = buckets.entry(index as i64).or_default();
        if left.is_finite() {
            acc.left.0 += left as f64;
            acc.left.1 += 1;
        }
        if right.is_finite() {
            acc.right.0 += right as f64;
            acc.right.1 += 1;
        }
    }

    let (Some(&first), Some(&last)) = (buckets.keys().next(), buckets.keys().next_back()) else {
        return Vec::new();
    };
    let point = |k: i64, acc: Accum| SwingSpeedPoint {
        time:  (k as f64 * window as f64) as f32,
        left:  mean(acc.left),
        right: mean(acc.right),
    };
    // Both ends are within ±MAX_BUCKET_INDEX, so the span cannot overflow.
    if (last - first) as u64 >= MAX_SWING_BUCKETS as u64 {
        return buckets.into_iter().map(|(k, acc)| point(k, acc)).collect();
    }
    (first..=last)
        .map(|k| point(k, buckets.remove(&k).unwrap_or_default()))
        .collect()
}

/// Song time of the last kept frame, or zero without frames.
pub fn replay_length_seconds(replay: &Replay) -> f32 {
    replay.frames.last().map_or(0.0, |f| f.time.max(0.0))
}

// ── Response ─────────────────────────────────────────────────────────────────

/// Everything a chart consumer needs for one replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedReplayResponse {
    pub replay:                Replay,
    pub cut_distribution:      Vec<CutBucket>,
    pub swing_speed:           Vec<SwingSpeedPoint>,
    pub replay_length_seconds: f32,
}

impl DecodedReplayResponse {
    pub fn from_replay(replay: Replay, opts: &AnalyticsOptions) -> Self {
        let cut_distribution = cut_distribution(&replay);
        let swing_speed = swing_speed(&replay, opts.swing_window_seconds);
        let replay_length_seconds = replay_length_seconds(&replay);
        Self { replay, cut_distribution, swing_speed, replay_length_seconds }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Euler, Frame, Note, NoteEventType, Vector3};

    fn cut(before: f32, after: f32, dist: f32) -> CutInfo {
        CutInfo {
            before_cut_rating:      before,
            after_cut_rating:       after,
            cut_distance_to_center: dist,
            ..Default::default()
        }
    }

    fn note(kind: NoteEventType, cut_info: Option<CutInfo>) -> Note {
        Note { note_id: 1, event_time: 1.0, spawn_time: 0.5, event_type: kind, cut_info }
    }

    #[test]
    fn perfect_cut_scores_115() {
        assert_eq!(cut_score(&cut(1.0, 1.0, 0.0)), 115);
    }

    #[test]
    fn far_from_center_adds_nothing() {
        assert_eq!(cut_score(&cut(1.0, 1.0, 0.3)), 100);
        assert_eq!(cut_score(&cut(1.0, 1.0, 0.9)), 100);
        assert_eq!(cut_score(&cut(0.5, 0.0, 0.3)), 35);
    }

    #[test]
    fn ratings_are_clamped() {
        assert_eq!(cut_score(&cut(2.0, 1.5, -1.0)), 115);
        assert_eq!(cut_score(&cut(-1.0, -1.0, 5.0)), 0);
    }

    #[test]
    fn center_term_is_linear() {
        // 0.06 from center keeps 80% of the 15 points.
        assert_eq!(cut_score(&cut(1.0, 1.0, 0.06)), 112);
    }

    #[test]
    fn distribution_only_counts_cuts() {
        let replay = Replay {
            notes: vec![
                note(NoteEventType::Good, Some(cut(1.0, 1.0, 0.0))),
                note(NoteEventType::Bad, Some(cut(1.0, 1.0, 0.0))),
                note(NoteEventType::Good, Some(cut(1.0, 0.0, 0.3))),
                note(NoteEventType::Miss, None),
                note(NoteEventType::Bomb, Some(cut(1.0, 1.0, 0.0))),
            ],
            ..Default::default()
        };
        assert_eq!(cut_distribution(&replay), vec![
            CutBucket { score: 70, count: 1 },
            CutBucket { score: 115, count: 2 },
        ]);
    }

    fn moving_frame(time: f32, left_x: f32, right_x: f32) -> Frame {
        let pose = |x| Euler { position: Vector3 { x, y: 0.0, z: 0.0 }, ..Default::default() };
        Frame { time, fps: 60, head: Euler::default(), left: pose(left_x), right: pose(right_x) }
    }

    #[test]
    fn swing_speed_buckets_by_window() {
        let replay = Replay {
            frames: vec![
                moving_frame(0.5, 0.0, 0.0),
                moving_frame(1.0, 1.0, 0.0),
                moving_frame(1.5, 2.0, 0.5),
                // bucket [2, 4) is empty
                moving_frame(4.5, 2.0, 0.5),
            ],
            ..Default::default()
        };
        let series = swing_speed(&replay, 2.0);
        assert_eq!(series.len(), 3);
        assert_eq!(series[0], SwingSpeedPoint { time: 0.0, left: 2.0, right: 0.5 });
        assert_eq!(series[1], SwingSpeedPoint { time: 2.0, left: 0.0, right: 0.0 });
        assert_eq!(series[2], SwingSpeedPoint { time: 4.0, left: 0.0, right: 0.0 });
    }

    #[test]
    fn swing_speed_skips_infinite_times() {
        let replay = Replay {
            frames: vec![
                moving_frame(1.0, 0.0, 0.0),
                moving_frame(2.0, 1.0, 0.0),
                moving_frame(f32::INFINITY, 5.0, 5.0),
            ],
            ..Default::default()
        };
        let series = swing_speed(&replay, 2.0);
        assert_eq!(series, vec![SwingSpeedPoint { time: 2.0, left: 1.0, right: 0.0 }]);
    }

    #[test]
    fn swing_speed_outlier_time_does_not_fill_gap() {
        let replay = Replay {
            frames: vec![
                moving_frame(1.0, 0.0, 0.0),
                moving_frame(2.0, 1.0, 0.0),
                moving_frame(2.0e7, 1.0, 0.0),
            ],
            ..Default::default()
        };
        let series = swing_speed(&replay, 2.0);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].time, 2.0);
        assert_eq!(series[1].time, 2.0e7);
    }

    #[test]
    fn swing_speed_tiny_window_stays_bounded() {
        let frames: Vec<Frame> = (1..=50).map(|i| moving_frame(i as f32, i as f32, 0.0)).collect();
        let replay = Replay { frames, ..Default::default() };
        assert_eq!(swing_speed(&replay, 1.0e-30).len(), 0);
        assert_eq!(swing_speed(&replay, 1.0e-3).len(), 49);
    }

    #[test]
    fn swing_speed_needs_two_frames() {
        let replay = Replay { frames: vec![moving_frame(1.0, 0.0, 0.0)], ..Default::default() };
        assert!(swing_speed(&replay, 2.0).is_empty());
        assert!(swing_speed(&Replay::default(), 0.0).is_empty());
    }

    #[test]
    fn response_collects_everything() {
        let replay = Replay {
            frames: vec![moving_frame(0.5, 0.0, 0.0), moving_frame(61.0, 0.0, 0.0)],
            notes:  vec![note(NoteEventType::Good, Some(cut(1.0, 1.0, 0.0)))],
            ..Default::default()
        };
        let resp = DecodedReplayResponse::from_replay(replay, &AnalyticsOptions::default());
        assert_eq!(resp.replay_length_seconds, 61.0);
        assert_eq!(resp.cut_distribution, vec![CutBucket { score: 115, count: 1 }]);
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("cutDistribution").is_some());
        assert!(json.get("replayLengthSeconds").is_some());
    }
}
