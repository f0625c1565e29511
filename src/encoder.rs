//! `.bsor` writer.
//!
//! Produces the exact layouts [`crate::decoder`] reads.  Present sections are
//! written in tag order; empty lists and `None` sections are omitted.  Frames
//! are written as given, without the decoder's deduplication.  The player name
//! is written with its true length.
//!
//! Decoding the output gives back an equal [`Replay`] only when the frames
//! already satisfy the dedupe rule and, if `info` is present, the platform
//! string is 5, 6 or 8 bytes long (`"steam"`, `"oculus"`, `"oculuspc"`).  The
//! decoder's player-name reader scans for those lengths; any other platform
//! length may make it swallow bytes into the name.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::decoder::{SectionTag, MAGIC, VERSION};
use crate::extensions::{HandReplay, HeartBeatQuest, TricksReplay};
use crate::model::{
    CutInfo, Euler, Frame, HeightEvent, Note, Offsets, PauseEvent, Quaternion, Replay, ReplayInfo,
    Vector3, Wall,
};

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_i32::<LittleEndian>(s.len() as i32)?;
    w.write_all(s.as_bytes())
}

fn write_count<W: Write>(w: &mut W, n: usize) -> io::Result<()> {
    let n = i32::try_from(n)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "list too long for i32 count"))?;
    w.write_i32::<LittleEndian>(n)
}

impl Vector3 {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_f32::<LittleEndian>(self.x)?;
        w.write_f32::<LittleEndian>(self.y)?;
        w.write_f32::<LittleEndian>(self.z)
    }
}

impl Quaternion {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_f32::<LittleEndian>(self.x)?;
        w.write_f32::<LittleEndian>(self.y)?;
        w.write_f32::<LittleEndian>(self.z)?;
        w.write_f32::<LittleEndian>(self.w)
    }
}

impl Euler {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        self.position.write(&mut w)?;
        self.rotation.write(&mut w)
    }
}

impl Frame {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_f32::<LittleEndian>(self.time)?;
        w.write_i32::<LittleEndian>(self.fps)?;
        self.head.write(&mut w)?;
        self.left.write(&mut w)?;
        self.right.write(&mut w)
    }
}

impl CutInfo {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u8(self.speed_ok as u8)?;
        w.write_u8(self.direction_ok as u8)?;
        w.write_u8(self.saber_type_ok as u8)?;
        w.write_u8(self.was_cut_too_soon as u8)?;
        w.write_f32::<LittleEndian>(self.saber_speed)?;
        self.saber_dir.write(&mut w)?;
        w.write_i32::<LittleEndian>(self.saber_type)?;
        w.write_f32::<LittleEndian>(self.time_deviation)?;
        w.write_f32::<LittleEndian>(self.cut_dir_deviation)?;
        self.cut_point.write(&mut w)?;
        self.cut_normal.write(&mut w)?;
        w.write_f32::<LittleEndian>(self.cut_distance_to_center)?;
        w.write_f32::<LittleEndian>(self.cut_angle)?;
        w.write_f32::<LittleEndian>(self.before_cut_rating)?;
        w.write_f32::<LittleEndian>(self.after_cut_rating)
    }
}

impl Note {
    /// Cut info is written only for good/bad events; a missing one is
    /// written as zeros so the stream stays aligned.
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_i32::<LittleEndian>(self.note_id)?;
        w.write_f32::<LittleEndian>(self.event_time)?;
        w.write_f32::<LittleEndian>(self.spawn_time)?;
        w.write_i32::<LittleEndian>(self.event_type.as_i32())?;
        if self.event_type.has_cut_info() {
            self.cut_info.unwrap_or_default().write(&mut w)?;
        }
        Ok(())
    }
}

impl Wall {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_i32::<LittleEndian>(self.wall_id)?;
        w.write_f32::<LittleEndian>(self.energy)?;
        w.write_f32::<LittleEndian>(self.time)?;
        w.write_f32::<LittleEndian>(self.spawn_time)
    }
}

impl HeightEvent {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_f32::<LittleEndian>(self.height)?;
        w.write_f32::<LittleEndian>(self.time)
    }
}

impl PauseEvent {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_i64::<LittleEndian>(self.duration)?;
        w.write_f32::<LittleEndian>(self.time)
    }
}

impl Offsets {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        self.left_saber_position.write(&mut w)?;
        self.left_saber_rotation.write(&mut w)?;
        self.right_saber_position.write(&mut w)?;
        self.right_saber_rotation.write(&mut w)
    }
}

impl ReplayInfo {
    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        for s in [&self.version, &self.game_version, &self.timestamp, &self.player_id,
                  &self.player_name, &self.platform, &self.tracking_system, &self.hmd,
                  &self.controller, &self.hash, &self.song_name, &self.mapper,
                  &self.difficulty] {
            write_string(&mut w, s)?;
        }
        w.write_i32::<LittleEndian>(self.score)?;
        write_string(&mut w, &self.mode)?;
        write_string(&mut w, &self.environment)?;
        write_string(&mut w, &self.modifiers)?;
        w.write_f32::<LittleEndian>(self.jump_distance)?;
        w.write_u8(self.left_handed as u8)?;
        w.write_f32::<LittleEndian>(self.height)?;
        w.write_f32::<LittleEndian>(self.start_time)?;
        w.write_f32::<LittleEndian>(self.fail_time)?;
        w.write_f32::<LittleEndian>(self.speed)
    }
}

fn write_list<W: Write, T>(
    w:     &mut W,
    tag:   SectionTag,
    items: &[T],
    write: impl Fn(&T, &mut W) -> io::Result<()>,
) -> io::Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    w.write_u8(tag as u8)?;
    write_count(w, items.len())?;
    for item in items {
        write(item, &mut *w)?;
    }
    Ok(())
}

/// Write a full replay to `w`.
pub fn write_replay<W: Write>(replay: &Replay, mut w: W) -> io::Result<()> {
    w.write_u32::<LittleEndian>(MAGIC)?;
    w.write_u8(VERSION)?;

    if let Some(info) = &replay.info {
        w.write_u8(SectionTag::Info as u8)?;
        info.write(&mut w)?;
    }
    write_list(&mut w, SectionTag::Frames, &replay.frames, |f, w| f.write(w))?;
    write_list(&mut w, SectionTag::Notes, &replay.notes, |n, w| n.write(w))?;
    write_list(&mut w, SectionTag::Walls, &replay.walls, |x, w| x.write(w))?;
    write_list(&mut w, SectionTag::Heights, &replay.heights, |h, w| h.write(w))?;
    write_list(&mut w, SectionTag::Pauses, &replay.pauses, |p, w| p.write(w))?;
    if let Some(offset) = &replay.offset {
        w.write_u8(SectionTag::Offset as u8)?;
        offset.write(&mut w)?;
    }
    if !replay.custom_data.is_empty() {
        w.write_u8(SectionTag::CustomData as u8)?;
        write_count(&mut w, replay.custom_data.len())?;
        for (key, blob) in &replay.custom_data {
            write_string(&mut w, key)?;
            write_count(&mut w, blob.len())?;
            w.write_all(blob)?;
        }
    }
    Ok(())
}

pub fn encode(replay: &Replay) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    write_replay(replay, &mut out)?;
    Ok(out)
}

// ── Extension blobs ──────────────────────────────────────────────────────────

pub fn encode_heartbeat(hb: &HeartBeatQuest) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_i32::<LittleEndian>(hb.version)?;
    write_count(&mut out, hb.data.len())?;
    for sample in &hb.data {
        out.write_f32::<LittleEndian>(sample.time)?;
        out.write_i32::<LittleEndian>(sample.heartrate)?;
    }
    write_string(&mut out, &hb.device)?;
    Ok(out)
}

fn write_hand<W: Write>(w: &mut W, hand: &HandReplay) -> io::Result<()> {
    write_count(w, hand.segments.len())?;
    for segment in &hand.segments {
        write_count(w, segment.frames.len())?;
        for frame in &segment.frames {
            w.write_f32::<LittleEndian>(frame.song_time)?;
            frame.position.write(&mut *w)?;
            frame.rotation.write(&mut *w)?;
        }
    }
    Ok(())
}

pub fn encode_tricks(tricks: &TricksReplay) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_i32::<LittleEndian>(tricks.magic)?;
    out.write_i32::<LittleEndian>(tricks.version)?;
    write_hand(&mut out, &tricks.left)?;
    write_hand(&mut out, &tricks.right)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decode_with, DecodeOptions};

    fn replay_with(player_name: &str, platform: &str) -> Replay {
        Replay {
            info: Some(ReplayInfo {
                player_name:     player_name.into(),
                platform:        platform.into(),
                tracking_system: "Oculus".into(),
                hmd:             "Quest 2".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn sentinel_platforms_decode_back_equal() {
        for platform in ["steam", "oculus", "oculuspc"] {
            let replay = replay_with("bob", platform);
            let decoded = decode_with(&encode(&replay).unwrap(), &DecodeOptions::default()).unwrap();
            assert_eq!(decoded.info, replay.info, "{platform}");
        }
    }

    #[test]
    fn other_platform_lengths_do_not_decode_back_equal() {
        let replay = replay_with("bob", "pico");
        match decode_with(&encode(&replay).unwrap(), &DecodeOptions::default()) {
            Ok(decoded) => assert_ne!(decoded.info, replay.info),
            Err(_) => {}
        }
    }

    #[test]
    fn absent_sections_are_not_written() {
        let bytes = encode(&Replay::default()).unwrap();
        assert_eq!(bytes.len(), 5);
    }
}
