//! In-memory replay structure.
//!
//! Field names serialise in camelCase to match the JSON shape chart
//! consumers read.  Everything here is plain data; the decoder builds it,
//! the trick merger fills in [`Euler::trick_position`] / [`Euler::trick_rotation`],
//! and nothing else mutates it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extensions::{HeartBeatQuest, ParsedExtension, TricksReplay};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn distance(&self, other: &Vector3) -> f32 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// Position + rotation of one tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Euler {
    pub position: Vector3,
    pub rotation: Quaternion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trick_position: Option<Vector3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trick_rotation: Option<Quaternion>,
}

impl Euler {
    pub fn new(position: Vector3, rotation: Quaternion) -> Self {
        Self { position, rotation, trick_position: None, trick_rotation: None }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Frame {
    pub time:  f32,
    pub fps:   i32,
    pub head:  Euler,
    pub left:  Euler,
    pub right: Euler,
}

// ── Notes ────────────────────────────────────────────────────────────────────

/// Outcome recorded for a note.  Unrecognised codes are kept as `Unknown`
/// and never carry cut info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum NoteEventType {
    Good,
    Bad,
    Miss,
    Bomb,
    Unknown(i32),
}

impl NoteEventType {
    pub fn from_i32(v: i32) -> Self {
        match v {
            0 => NoteEventType::Good,
            1 => NoteEventType::Bad,
            2 => NoteEventType::Miss,
            3 => NoteEventType::Bomb,
            other => NoteEventType::Unknown(other),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            NoteEventType::Good => 0,
            NoteEventType::Bad => 1,
            NoteEventType::Miss => 2,
            NoteEventType::Bomb => 3,
            NoteEventType::Unknown(v) => v,
        }
    }

    /// Good and bad cuts are followed by a [`CutInfo`] record on the wire.
    pub fn has_cut_info(self) -> bool {
        matches!(self, NoteEventType::Good | NoteEventType::Bad)
    }

    pub fn name(self) -> &'static str {
        match self {
            NoteEventType::Good => "good",
            NoteEventType::Bad => "bad",
            NoteEventType::Miss => "miss",
            NoteEventType::Bomb => "bomb",
            NoteEventType::Unknown(_) => "unknown",
        }
    }
}

impl From<i32> for NoteEventType {
    fn from(v: i32) -> Self { NoteEventType::from_i32(v) }
}

impl From<NoteEventType> for i32 {
    fn from(t: NoteEventType) -> Self { t.as_i32() }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CutInfo {
    pub speed_ok:               bool,
    pub direction_ok:           bool,
    pub saber_type_ok:          bool,
    pub was_cut_too_soon:       bool,
    pub saber_speed:            f32,
    pub saber_dir:              Vector3,
    pub saber_type:             i32,
    pub time_deviation:         f32,
    pub cut_dir_deviation:      f32,
    pub cut_point:              Vector3,
    pub cut_normal:             Vector3,
    pub cut_distance_to_center: f32,
    pub cut_angle:              f32,
    pub before_cut_rating:      f32,
    pub after_cut_rating:       f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(rename = "noteID")]
    pub note_id:    i32,
    pub event_time: f32,
    pub spawn_time: f32,
    pub event_type: NoteEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cut_info:   Option<CutInfo>,
}

// ── Simple records ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wall {
    #[serde(rename = "wallID")]
    pub wall_id:    i32,
    pub energy:     f32,
    pub time:       f32,
    pub spawn_time: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeightEvent {
    pub height: f32,
    pub time:   f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PauseEvent {
    pub duration: i64,
    pub time:     f32,
}

/// Saber calibration offsets.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offsets {
    pub left_saber_position:  Vector3,
    pub left_saber_rotation:  Quaternion,
    pub right_saber_position: Vector3,
    pub right_saber_rotation: Quaternion,
}

// ── Info ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayInfo {
    pub version:         String,
    pub game_version:    String,
    /// Unix seconds, as written by the recorder.
    pub timestamp:       String,
    #[serde(rename = "playerID")]
    pub player_id:       String,
    pub player_name:     String,
    pub platform:        String,
    pub tracking_system: String,
    pub hmd:             String,
    pub controller:      String,
    pub hash:            String,
    pub song_name:       String,
    pub mapper:          String,
    pub difficulty:      String,
    pub score:           i32,
    pub mode:            String,
    pub environment:     String,
    /// Comma-separated modifier codes.
    pub modifiers:       String,
    pub jump_distance:   f32,
    pub left_handed:     bool,
    pub height:          f32,
    pub start_time:      f32,
    pub fail_time:       f32,
    pub speed:           f32,
}

impl ReplayInfo {
    pub fn modifier_list(&self) -> Vec<&str> {
        self.modifiers
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .collect()
    }

    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        let secs: i64 = self.timestamp.trim().parse().ok()?;
        DateTime::from_timestamp(secs, 0)
    }

    pub fn failed(&self) -> bool {
        self.fail_time > 0.0
    }
}

// ── Replay ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replay {
    pub info:               Option<ReplayInfo>,
    pub frames:             Vec<Frame>,
    pub notes:              Vec<Note>,
    pub walls:              Vec<Wall>,
    pub heights:            Vec<HeightEvent>,
    pub pauses:             Vec<PauseEvent>,
    pub offset:             Option<Offsets>,
    /// Extension blobs exactly as stored, keyed by name.
    pub custom_data:        BTreeMap<String, Vec<u8>>,
    /// Decoded form of the recognised keys in `custom_data`.
    pub parsed_custom_data: BTreeMap<String, ParsedExtension>,
}

impl Replay {
    pub fn heartbeat(&self) -> Option<&HeartBeatQuest> {
        self.parsed_custom_data.values().find_map(|ext| match ext {
            ParsedExtension::HeartBeat(hb) => Some(hb),
            _ => None,
        })
    }

    pub fn tricks(&self) -> Option<&TricksReplay> {
        self.parsed_custom_data.values().find_map(|ext| match ext {
            ParsedExtension::Tricks(t) => Some(t),
            _ => None,
        })
    }

    /// Number of notes per event type, ordered good, bad, miss, bomb, then unknown codes.
    pub fn note_count_by_type(&self) -> Vec<(NoteEventType, usize)> {
        let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
        for note in &self.notes {
            *counts.entry(note.event_type.as_i32()).or_default() += 1;
        }
        let mut out: Vec<(NoteEventType, usize)> = counts
            .into_iter()
            .map(|(code, n)| (NoteEventType::from_i32(code), n))
            .collect();
        out.sort_by_key(|(t, _)| match t {
            NoteEventType::Unknown(code) => (1, *code),
            known => (0, known.as_i32()),
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_codes() {
        assert_eq!(NoteEventType::from_i32(0), NoteEventType::Good);
        assert_eq!(NoteEventType::from_i32(3), NoteEventType::Bomb);
        assert_eq!(NoteEventType::from_i32(9), NoteEventType::Unknown(9));
        assert!(NoteEventType::Bad.has_cut_info());
        assert!(!NoteEventType::Miss.has_cut_info());
        assert!(!NoteEventType::Unknown(0x10).has_cut_info());
    }

    #[test]
    fn modifiers_split_and_timestamp() {
        let info = ReplayInfo {
            modifiers: "FS, NF,".into(),
            timestamp: "1700000000".into(),
            ..Default::default()
        };
        assert_eq!(info.modifier_list(), vec!["FS", "NF"]);
        assert_eq!(info.timestamp_utc().unwrap().timestamp(), 1_700_000_000);
        assert!(ReplayInfo::default().timestamp_utc().is_none());
    }

    #[test]
    fn note_serialises_with_wire_names() {
        let note = Note {
            note_id:    30100,
            event_time: 1.0,
            spawn_time: 0.5,
            event_type: NoteEventType::Miss,
            cut_info:   None,
        };
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["noteID"], 30100);
        assert_eq!(json["eventType"], 2);
        assert!(json.get("cutInfo").is_none());
    }

    #[test]
    fn counts_notes_by_type() {
        let note = |t: i32| Note {
            note_id: 0, event_time: 0.0, spawn_time: 0.0,
            event_type: NoteEventType::from_i32(t), cut_info: None,
        };
        let replay = Replay {
            notes: vec![note(2), note(0), note(0), note(7), note(3)],
            ..Default::default()
        };
        assert_eq!(replay.note_count_by_type(), vec![
            (NoteEventType::Good, 2),
            (NoteEventType::Miss, 1),
            (NoteEventType::Bomb, 1),
            (NoteEventType::Unknown(7), 1),
        ]);
    }
}
