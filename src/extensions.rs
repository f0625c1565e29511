//! Decoders for the vendor blobs stored in the custom-data section.
//!
//! Each recognised key maps to an [`ExtensionDecoder`] in an
//! [`ExtensionRegistry`].  A decoder gets a fresh cursor over its own blob
//! and returns:
//!
//! - `Ok(Some(ext))`: decoded;
//! - `Ok(None)`: the blob's own magic/version gate did not match;
//! - `Err(_)`: the blob is truncated or malformed.
//!
//! The last two are both absorbed by [`ExtensionRegistry::parse_all`]: the key
//! simply gets no entry in `parsed_custom_data`.
//!
//! # Layouts
//!
//! ```text
//! HeartBeatQuest          version:i32 (=1) | count:i32 | count × (time:f32, heartrate:i32) | device:string
//! reesabers:tricks-replay magic:i32 (=1630166513) | version:i32 | left:HandReplay | right:HandReplay
//! HandReplay              segments:i32 | segments × (frames:i32 | frames × TrickFrame)
//! TrickFrame              songTime:f32 | pos xyz:f32 | rot xyzw:f32
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cursor::{ByteCursor, StringLimits};
use crate::error::DecodeError;
use crate::model::{Quaternion, Vector3};

pub const HEARTBEAT_KEY:     &str = "HeartBeatQuest";
pub const HEARTBEAT_VERSION: i32  = 1;
pub const TRICKS_KEY:        &str = "reesabers:tricks-replay";
pub const TRICKS_MAGIC:      i32  = 1630166513;

// ── Heart rate ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub time:      f32,
    pub heartrate: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartBeatQuest {
    pub version: i32,
    pub data:    Vec<HeartRateSample>,
    pub device:  String,
}

impl HeartBeatQuest {
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Option<Self>, DecodeError> {
        let version = c.read_i32()?;
        if version != HEARTBEAT_VERSION {
            debug!(version, "unsupported heart rate version");
            return Ok(None);
        }
        let count = c.read_count("heart rate")?;
        let mut data = Vec::with_capacity(count.min(c.remaining() / 8));
        for _ in 0..count {
            data.push(HeartRateSample {
                time:      c.read_f32()?,
                heartrate: c.read_i32()?,
            });
        }
        let device = c.read_string()?;
        Ok(Some(Self { version, data, device }))
    }

    pub fn average_bpm(&self) -> Option<f32> {
        if self.data.is_empty() {
            return None;
        }
        let total: i64 = self.data.iter().map(|s| s.heartrate as i64).sum();
        Some(total as f32 / self.data.len() as f32)
    }
}

// ── Trick replay ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrickFrame {
    pub song_time: f32,
    pub position:  Vector3,
    pub rotation:  Quaternion,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrickSegment {
    pub frames: Vec<TrickFrame>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HandReplay {
    pub segments: Vec<TrickSegment>,
}

impl HandReplay {
    fn read(c: &mut ByteCursor<'_>) -> Result<Self, DecodeError> {
        let segment_count = c.read_count("trick segment")?;
        let mut segments = Vec::with_capacity(segment_count.min(c.remaining() / 4));
        for _ in 0..segment_count {
            let frame_count = c.read_count("trick frame")?;
            let mut frames = Vec::with_capacity(frame_count.min(c.remaining() / 32));
            for _ in 0..frame_count {
                frames.push(TrickFrame {
                    song_time: c.read_f32()?,
                    position:  Vector3::read(c)?,
                    rotation:  Quaternion::read(c)?,
                });
            }
            segments.push(TrickSegment { frames });
        }
        Ok(Self { segments })
    }

    /// All frames across segments, in stored order.
    pub fn frames(&self) -> impl Iterator<Item = &TrickFrame> {
        self.segments.iter().flat_map(|s| s.frames.iter())
    }

    pub fn frame_count(&self) -> usize {
        self.segments.iter().map(|s| s.frames.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TricksReplay {
    pub magic:   i32,
    pub version: i32,
    pub left:    HandReplay,
    pub right:   HandReplay,
}

impl TricksReplay {
    pub fn read(c: &mut ByteCursor<'_>) -> Result<Option<Self>, DecodeError> {
        let magic = c.read_i32()?;
        if magic != TRICKS_MAGIC {
            debug!(magic, "trick replay magic mismatch");
            return Ok(None);
        }
        let version = c.read_i32()?;
        let left = HandReplay::read(c)?;
        let right = HandReplay::read(c)?;
        Ok(Some(Self { magic, version, left, right }))
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Decoded form of a recognised custom-data key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParsedExtension {
    HeartBeat(HeartBeatQuest),
    Tricks(TricksReplay),
}

pub type ExtensionDecoder =
    fn(&mut ByteCursor<'_>) -> Result<Option<ParsedExtension>, DecodeError>;

fn decode_heartbeat(c: &mut ByteCursor<'_>) -> Result<Option<ParsedExtension>, DecodeError> {
    Ok(HeartBeatQuest::read(c)?.map(ParsedExtension::HeartBeat))
}

fn decode_tricks(c: &mut ByteCursor<'_>) -> Result<Option<ParsedExtension>, DecodeError> {
    Ok(TricksReplay::read(c)?.map(ParsedExtension::Tricks))
}

#[derive(Clone)]
pub struct ExtensionRegistry {
    decoders: BTreeMap<String, ExtensionDecoder>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        let mut reg = Self::empty();
        reg.register(HEARTBEAT_KEY, decode_heartbeat);
        reg.register(TRICKS_KEY, decode_tricks);
        reg
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}

impl ExtensionRegistry {
    pub fn empty() -> Self {
        Self { decoders: BTreeMap::new() }
    }

    /// Add or replace the decoder for `key`.
    pub fn register(&mut self, key: &str, decoder: ExtensionDecoder) {
        self.decoders.insert(key.to_string(), decoder);
    }

    pub fn get(&self, key: &str) -> Option<ExtensionDecoder> {
        self.decoders.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(String::as_str)
    }

    /// Decode one blob.  Failures are logged and reported as `None`.
    pub fn parse(&self, key: &str, blob: &[u8], limits: StringLimits) -> Option<ParsedExtension> {
        let decoder = self.get(key)?;
        let mut c = ByteCursor::with_limits(blob, limits);
        match decoder(&mut c) {
            Ok(Some(ext)) => {
                debug!(key, bytes = blob.len(), "decoded extension");
                Some(ext)
            }
            Ok(None) => None,
            Err(e) => {
                debug!(key, error = %e, "skipping malformed extension");
                None
            }
        }
    }

    pub fn parse_all(
        &self,
        raw:    &BTreeMap<String, Vec<u8>>,
        limits: StringLimits,
    ) -> BTreeMap<String, ParsedExtension> {
        raw.iter()
            .filter_map(|(key, blob)| Some((key.clone(), self.parse(key, blob, limits)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{encode_heartbeat, encode_tricks};

    fn sample_tricks() -> TricksReplay {
        let frame = |t: f32| TrickFrame {
            song_time: t,
            position:  Vector3 { x: t, y: 1.0, z: -1.0 },
            rotation:  Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 },
        };
        TricksReplay {
            magic:   TRICKS_MAGIC,
            version: 1,
            left:    HandReplay {
                segments: vec![
                    TrickSegment { frames: vec![frame(1.0), frame(1.1)] },
                    TrickSegment { frames: vec![frame(3.0)] },
                ],
            },
            right:   HandReplay::default(),
        }
    }

    #[test]
    fn decodes_heartbeat() {
        let hb = HeartBeatQuest {
            version: 1,
            data:    vec![
                HeartRateSample { time: 0.5, heartrate: 90 },
                HeartRateSample { time: 1.5, heartrate: 110 },
            ],
            device:  "Polar H10".into(),
        };
        let blob = encode_heartbeat(&hb).unwrap();
        let parsed = ExtensionRegistry::default().parse(HEARTBEAT_KEY, &blob, StringLimits::default());
        assert_eq!(parsed, Some(ParsedExtension::HeartBeat(hb.clone())));
        assert_eq!(hb.average_bpm(), Some(100.0));
    }

    #[test]
    fn heartbeat_wrong_version_is_skipped() {
        let blob = 2i32.to_le_bytes().to_vec();
        let parsed = ExtensionRegistry::default().parse(HEARTBEAT_KEY, &blob, StringLimits::default());
        assert!(parsed.is_none());
    }

    #[test]
    fn decodes_tricks() {
        let tricks = sample_tricks();
        let blob = encode_tricks(&tricks).unwrap();
        let parsed = ExtensionRegistry::default().parse(TRICKS_KEY, &blob, StringLimits::default());
        match parsed {
            Some(ParsedExtension::Tricks(t)) => {
                assert_eq!(t, tricks);
                assert_eq!(t.left.frame_count(), 3);
                assert_eq!(t.right.frame_count(), 0);
            }
            other => panic!("expected tricks, got {other:?}"),
        }
    }

    #[test]
    fn tricks_bad_magic_is_skipped() {
        let mut blob = encode_tricks(&sample_tricks()).unwrap();
        blob[0] ^= 0xFF;
        assert!(ExtensionRegistry::default().parse(TRICKS_KEY, &blob, StringLimits::default()).is_none());
    }

    #[test]
    fn truncated_blob_is_skipped() {
        let blob = encode_tricks(&sample_tricks()).unwrap();
        let cut = &blob[..blob.len() - 3];
        assert!(ExtensionRegistry::default().parse(TRICKS_KEY, cut, StringLimits::default()).is_none());
    }

    #[test]
    fn unknown_keys_produce_nothing() {
        let mut raw = BTreeMap::new();
        raw.insert("someone:else".to_string(), vec![1, 2, 3]);
        raw.insert(HEARTBEAT_KEY.to_string(), encode_heartbeat(&HeartBeatQuest {
            version: 1, data: Vec::new(), device: String::new(),
        }).unwrap());
        let parsed = ExtensionRegistry::default().parse_all(&raw, StringLimits::default());
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains_key(HEARTBEAT_KEY));
    }

    #[test]
    fn custom_decoder_can_be_registered() {
        fn fixed(_: &mut ByteCursor<'_>) -> Result<Option<ParsedExtension>, DecodeError> {
            Ok(Some(ParsedExtension::Tricks(TricksReplay {
                magic: 0, version: 0, left: HandReplay::default(), right: HandReplay::default(),
            })))
        }
        let mut reg = ExtensionRegistry::empty();
        reg.register("x", fixed);
        assert!(reg.parse("x", &[], StringLimits::default()).is_some());
        assert!(reg.parse(HEARTBEAT_KEY, &[1, 0, 0, 0], StringLimits::default()).is_none());
        assert_eq!(reg.keys().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn default_registry_knows_both_vendors() {
        let registry = ExtensionRegistry::default();
        let keys: Vec<&str> = registry.keys().collect();
        assert_eq!(keys, vec![HEARTBEAT_KEY, TRICKS_KEY]);
    }
}
