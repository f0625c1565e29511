//! Structural decoder for `.bsor` buffers.
//!
//! ```text
//! magic:u32 = 0x442d3d69 | version:u8 = 1 | up to 8 × (tag:u8 | section body)
//! ```
//!
//! Sections may come in any order, at most once each.  Decoding stops after
//! eight sections or when the buffer runs out, whichever is first.  A bad
//! magic, a bad version, an unknown or repeated tag, or a truncated section
//! fails the whole decode; no partial [`Replay`] is returned.
//!
//! Unknown tags are rejected on purpose rather than skipped: a section body
//! carries no length prefix, so there is no way to step over one, and a tag
//! outside 0..=7 almost always means the stream is already out of step.
//!
//! # Section bodies
//!
//! | Tag | Section    | Body |
//! |-----|------------|------|
//! | 0   | info       | 17 strings/scalars, see [`ReplayInfo::read`] |
//! | 1   | frames     | `count:i32`, then `time:f32 fps:i32 head left right` (poses are 7 × f32) |
//! | 2   | notes      | `count:i32`, then `id:i32 eventTime:f32 spawnTime:f32 type:i32 [cutInfo]` |
//! | 3   | walls      | `count:i32`, then `id:i32 energy:f32 time:f32 spawnTime:f32` |
//! | 4   | heights    | `count:i32`, then `height:f32 time:f32` |
//! | 5   | pauses     | `count:i32`, then `duration:i64 time:f32` |
//! | 6   | offset     | left pos, left rot, right pos, right rot |
//! | 7   | customData | `count:i32`, then `key:string len:i32 bytes` |

use std::collections::BTreeMap;

use tracing::debug;

use crate::cursor::{ByteCursor, StringLimits};
use crate::error::DecodeError;
use crate::extensions::ExtensionRegistry;
use crate::merge::merge_tricks;
use crate::model::{
    CutInfo, Euler, Frame, HeightEvent, Note, NoteEventType, Offsets, PauseEvent, Quaternion,
    Replay, ReplayInfo, Vector3, Wall,
};

pub const MAGIC: u32 = 0x442d3d69;
pub const VERSION: u8 = 1;
/// Upper bound on the number of sections in one buffer.
pub const SECTION_COUNT: usize = 8;

const FRAME_SIZE: usize = 8 + 3 * 28;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionTag {
    Info       = 0,
    Frames     = 1,
    Notes      = 2,
    Walls      = 3,
    Heights    = 4,
    Pauses     = 5,
    Offset     = 6,
    CustomData = 7,
}

impl SectionTag {
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => SectionTag::Info,
            1 => SectionTag::Frames,
            2 => SectionTag::Notes,
            3 => SectionTag::Walls,
            4 => SectionTag::Heights,
            5 => SectionTag::Pauses,
            6 => SectionTag::Offset,
            7 => SectionTag::CustomData,
            _ => return None,
        })
    }
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Configuration for [`decode_with`].
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub string_limits: StringLimits,
    /// Splice trick-replay samples into frames after decoding.
    pub merge_tricks:  bool,
    pub extensions:    ExtensionRegistry,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            string_limits: StringLimits::default(),
            merge_tricks:  true,
            extensions:    ExtensionRegistry::default(),
        }
    }
}

// ── Entry points ─────────────────────────────────────────────────────────────

pub fn decode(buf: &[u8]) -> Result<Replay, DecodeError> {
    decode_with(buf, &DecodeOptions::default())
}

pub fn decode_with(buf: &[u8], opts: &DecodeOptions) -> Result<Replay, DecodeError> {
    let mut c = ByteCursor::with_limits(buf, opts.string_limits);

    let magic = c.read_u32()?;
    if magic != MAGIC {
        return Err(DecodeError::InvalidMagic(magic));
    }
    let version = c.read_u8()?;
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let mut replay = Replay::default();
    let mut seen = 0u8;

    for _ in 0..SECTION_COUNT {
        if c.is_exhausted() {
            break;
        }
        let offset = c.offset();
        let tag = c.read_u8()?;
        let section = SectionTag::from_u8(tag)
            .ok_or(DecodeError::UnknownSection { tag, offset })?;
        if seen & (1 << tag) != 0 {
            return Err(DecodeError::DuplicateSection(tag));
        }
        seen |= 1 << tag;

        match section {
            SectionTag::Info => replay.info = Some(ReplayInfo::read(&mut c)?),
            SectionTag::Frames => replay.frames = read_frames(&mut c)?,
            SectionTag::Notes => replay.notes = read_list(&mut c, "notes", Note::read)?,
            SectionTag::Walls => replay.walls = read_list(&mut c, "walls", Wall::read)?,
            SectionTag::Heights => replay.heights = read_list(&mut c, "heights", HeightEvent::read)?,
            SectionTag::Pauses => replay.pauses = read_list(&mut c, "pauses", PauseEvent::read)?,
            SectionTag::Offset => replay.offset = Some(Offsets::read(&mut c)?),
            SectionTag::CustomData => {
                replay.custom_data = read_custom_data(&mut c)?;
                replay.parsed_custom_data =
                    opts.extensions.parse_all(&replay.custom_data, opts.string_limits);
            }
        }
        debug!(section = ?section, start = offset, end = c.offset(), "decoded section");
    }

    if opts.merge_tricks {
        merge_tricks(&mut replay);
    }
    Ok(replay)
}

// ── Sections ─────────────────────────────────────────────────────────────────

fn read_list<'a, T>(
    c:    &mut ByteCursor<'a>,
    what: &'static str,
    read: fn(&mut ByteCursor<'a>) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    let count = c.read_count(what)?;
    // The count is untrusted; never reserve more than the bytes left could hold.
    let mut out = Vec::with_capacity(count.min(c.remaining()));
    for _ in 0..count {
        out.push(read(c)?);
    }
    Ok(out)
}

/// Frames with `time == 0` and frames repeating the previous kept time are dropped.
fn read_frames(c: &mut ByteCursor<'_>) -> Result<Vec<Frame>, DecodeError> {
    let count = c.read_count("frames")?;
    let mut frames: Vec<Frame> = Vec::with_capacity(count.min(c.remaining() / FRAME_SIZE));
    let mut dropped = 0usize;
    for _ in 0..count {
        let frame = Frame::read(c)?;
        let repeat = frames.last().map_or(false, |last| last.time == frame.time);
        if frame.time == 0.0 || repeat {
            dropped += 1;
            continue;
        }
        frames.push(frame);
    }
    if dropped > 0 {
        debug!(kept = frames.len(), dropped, "deduplicated frames");
    }
    Ok(frames)
}

fn read_custom_data(c: &mut ByteCursor<'_>) -> Result<BTreeMap<String, Vec<u8>>, DecodeError> {
    let count = c.read_count("custom data")?;
    let mut out = BTreeMap::new();
    for _ in 0..count {
        let key = c.read_string()?;
        let len = c.read_count("custom data blob")?;
        let blob = c.read_bytes(len)?;
        out.insert(key, blob.to_vec());
    }
    Ok(out)
}

// ── Records ──────────────────────────────────────────────────────────────────

impl Vector3 {
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        Ok(Self { x: c.read_f32()?, y: c.read_f32()?, z: c.read_f32()? })
    }
}

impl Quaternion {
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        Ok(Self { x: c.read_f32()?, y: c.read_f32()?, z: c.read_f32()?, w: c.read_f32()? })
    }
}

impl Euler {
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        Ok(Euler::new(Vector3::read(c)?, Quaternion::read(c)?))
    }
}

impl Frame {
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            time:  c.read_f32()?,
            fps:   c.read_i32()?,
            head:  Euler::read(c)?,
            left:  Euler::read(c)?,
            right: Euler::read(c)?,
        })
    }
}

impl CutInfo {
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            speed_ok:               c.read_bool()?,
            direction_ok:           c.read_bool()?,
            saber_type_ok:          c.read_bool()?,
            was_cut_too_soon:       c.read_bool()?,
            saber_speed:            c.read_f32()?,
            saber_dir:              Vector3::read(c)?,
            saber_type:             c.read_i32()?,
            time_deviation:         c.read_f32()?,
            cut_dir_deviation:      c.read_f32()?,
            cut_point:              Vector3::read(c)?,
            cut_normal:             Vector3::read(c)?,
            cut_distance_to_center: c.read_f32()?,
            cut_angle:              c.read_f32()?,
            before_cut_rating:      c.read_f32()?,
            after_cut_rating:       c.read_f32()?,
        })
    }
}

impl Note {
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        let note_id = c.read_i32()?;
        let event_time = c.read_f32()?;
        let spawn_time = c.read_f32()?;
        let event_type = NoteEventType::from_i32(c.read_i32()?);
        let cut_info = if event_type.has_cut_info() {
            Some(CutInfo::read(c)?)
        } else {
            None
        };
        Ok(Self { note_id, event_time, spawn_time, event_type, cut_info })
    }
}

impl Wall {
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            wall_id:    c.read_i32()?,
            energy:     c.read_f32()?,
            time:       c.read_f32()?,
            spawn_time: c.read_f32()?,
        })
    }
}

impl HeightEvent {
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        Ok(Self { height: c.read_f32()?, time: c.read_f32()? })
    }
}

impl PauseEvent {
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        Ok(Self { duration: c.read_i64()?, time: c.read_f32()? })
    }
}

impl Offsets {
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            left_saber_position:  Vector3::read(c)?,
            left_saber_rotation:  Quaternion::read(c)?,
            right_saber_position: Vector3::read(c)?,
            right_saber_rotation: Quaternion::read(c)?,
        })
    }
}

impl ReplayInfo {
    /// The player name goes through the length-repairing name reader; every
    /// other string is a plain length-prefixed string.
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            version:         c.read_string()?,
            game_version:    c.read_string()?,
            timestamp:       c.read_string()?,
            player_id:       c.read_string()?,
            player_name:     c.read_name()?,
            platform:        c.read_string()?,
            tracking_system: c.read_string()?,
            hmd:             c.read_string()?,
            controller:      c.read_string()?,
            hash:            c.read_string()?,
            song_name:       c.read_string()?,
            mapper:          c.read_string()?,
            difficulty:      c.read_string()?,
            score:           c.read_i32()?,
            mode:            c.read_string()?,
            environment:     c.read_string()?,
            modifiers:       c.read_string()?,
            jump_distance:   c.read_f32()?,
            left_handed:     c.read_bool()?,
            height:          c.read_f32()?,
            start_time:      c.read_f32()?,
            fail_time:       c.read_f32()?,
            speed:           c.read_f32()?,
        })
    }
}

impl Replay {
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        decode(buf)
    }

    pub fn decode_with(buf: &[u8], opts: &DecodeOptions) -> Result<Self, DecodeError> {
        decode_with(buf, opts)
    }
}

/// Decode independent buffers.  With the `parallel` feature the buffers are
/// spread over the rayon pool; results keep input order either way.
pub fn decode_many<B>(buffers: &[B], opts: &DecodeOptions) -> Vec<Result<Replay, DecodeError>>
where
    B: AsRef<[u8]> + Sync,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        buffers.par_iter().map(|b| decode_with(b.as_ref(), opts)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        buffers.iter().map(|b| decode_with(b.as_ref(), opts)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;

    fn header() -> Vec<u8> {
        let mut buf = MAGIC.to_le_bytes().to_vec();
        buf.push(VERSION);
        buf
    }

    fn frame(time: f32, x: f32) -> Frame {
        let pose = Euler::new(Vector3 { x, y: 1.5, z: 0.0 }, Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 });
        Frame { time, fps: 90, head: pose, left: pose, right: pose }
    }

    #[test]
    fn header_only_buffer_is_empty_replay() {
        let replay = decode(&header()).unwrap();
        assert_eq!(replay, Replay::default());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = header();
        buf[0] = 0;
        assert!(matches!(decode(&buf), Err(DecodeError::InvalidMagic(_))));
    }

    #[test]
    fn rejects_bad_version() {
        let mut buf = header();
        buf[4] = 2;
        assert!(matches!(decode(&buf), Err(DecodeError::UnsupportedVersion(2))));
    }

    #[test]
    fn rejects_short_header() {
        assert!(matches!(decode(&[0x69, 0x3d]), Err(DecodeError::UnexpectedEof { .. })));
    }

    #[test]
    fn drops_zero_and_repeated_frame_times() {
        let replay = Replay {
            frames: vec![
                frame(0.0, 9.0),
                frame(0.1, 1.0),
                frame(0.1, 2.0),
                frame(0.2, 3.0),
                frame(0.0, 9.0),
                frame(0.3, 4.0),
                frame(0.3, 5.0),
            ],
            ..Default::default()
        };
        let decoded = decode(&encode(&replay).unwrap()).unwrap();
        let kept: Vec<(f32, f32)> = decoded.frames.iter().map(|f| (f.time, f.head.position.x)).collect();
        assert_eq!(kept, vec![(0.1, 1.0), (0.2, 3.0), (0.3, 4.0)]);
    }

    #[test]
    fn unknown_tag_fails() {
        let mut buf = header();
        buf.push(9);
        assert!(matches!(decode(&buf), Err(DecodeError::UnknownSection { tag: 9, offset: 5 })));
    }

    #[test]
    fn duplicate_tag_fails() {
        let mut buf = header();
        for _ in 0..2 {
            buf.push(SectionTag::Heights as u8);
            buf.extend_from_slice(&0i32.to_le_bytes());
        }
        assert!(matches!(decode(&buf), Err(DecodeError::DuplicateSection(4))));
    }

    #[test]
    fn truncated_section_fails() {
        let mut buf = header();
        buf.push(SectionTag::Walls as u8);
        buf.extend_from_slice(&2i32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 20]);
        assert!(matches!(decode(&buf), Err(DecodeError::UnexpectedEof { .. })));
    }

    #[test]
    fn negative_count_fails() {
        let mut buf = header();
        buf.push(SectionTag::Notes as u8);
        buf.extend_from_slice(&(-3i32).to_le_bytes());
        assert!(matches!(decode(&buf), Err(DecodeError::NegativeLength { len: -3, .. })));
    }

    #[test]
    fn sections_in_any_order() {
        let mut buf = header();
        buf.push(SectionTag::Pauses as u8);
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&250i64.to_le_bytes());
        buf.extend_from_slice(&12.5f32.to_le_bytes());
        buf.push(SectionTag::Heights as u8);
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&1.7f32.to_le_bytes());
        buf.extend_from_slice(&3.0f32.to_le_bytes());
        let replay = decode(&buf).unwrap();
        assert_eq!(replay.pauses, vec![PauseEvent { duration: 250, time: 12.5 }]);
        assert_eq!(replay.heights, vec![HeightEvent { height: 1.7, time: 3.0 }]);
        assert!(replay.info.is_none());
    }

    #[test]
    fn unrecognised_custom_key_stays_raw() {
        let mut replay = Replay::default();
        replay.custom_data.insert("vendor:thing".into(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let decoded = decode(&encode(&replay).unwrap()).unwrap();
        assert_eq!(decoded.custom_data["vendor:thing"], vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(decoded.parsed_custom_data.is_empty());
    }

    #[test]
    fn decode_many_keeps_order() {
        let good = header();
        let mut bad = header();
        bad[4] = 7;
        let results = decode_many(&[good.clone(), bad, good], &DecodeOptions::default());
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}
