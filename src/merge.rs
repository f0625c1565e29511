//! Splice trick-replay hand samples into the frame list.
//!
//! Each trick frame lands on the last frame whose time is `<=` the trick
//! frame's song time (or on the first frame if it precedes them all).  The
//! frame index only moves forward, across segments too, so one hand costs
//! `O(frames + trick frames)`.

use std::collections::BTreeMap;

use tracing::debug;

use crate::extensions::{HandReplay, ParsedExtension, TricksReplay};
use crate::model::{Euler, Frame, Replay};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    fn pose_mut(self, frame: &mut Frame) -> &mut Euler {
        match self {
            Hand::Left => &mut frame.left,
            Hand::Right => &mut frame.right,
        }
    }
}

fn find_tricks(parsed: &BTreeMap<String, ParsedExtension>) -> Option<&TricksReplay> {
    parsed.values().find_map(|ext| match ext {
        ParsedExtension::Tricks(t) => Some(t),
        _ => None,
    })
}

/// Attach trick samples for both hands.  Returns the number of trick frames
/// written; zero when there is no trick replay or no frames.
pub fn merge_tricks(replay: &mut Replay) -> usize {
    let Some(tricks) = find_tricks(&replay.parsed_custom_data) else {
        return 0;
    };
    let merged = merge_hand(&mut replay.frames, &tricks.left, Hand::Left)
        + merge_hand(&mut replay.frames, &tricks.right, Hand::Right);
    debug!(merged, frames = replay.frames.len(), "merged trick frames");
    merged
}

pub fn merge_hand(frames: &mut [Frame], hand_replay: &HandReplay, hand: Hand) -> usize {
    if frames.is_empty() {
        return 0;
    }
    let mut idx = 0usize;
    let mut merged = 0usize;
    for trick in hand_replay.frames() {
        while idx + 1 < frames.len() && frames[idx + 1].time <= trick.song_time {
            idx += 1;
        }
        let pose = hand.pose_mut(&mut frames[idx]);
        pose.trick_position = Some(trick.position);
        pose.trick_rotation = Some(trick.rotation);
        merged += 1;
    }
    merged
}
