//! Snapshot payloads and the rollback history ring

use crate::body::BodyId;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Smallest history the ring is ever created with
pub const MIN_SNAPSHOT_CAPACITY: usize = 8;

/// Current payload format
pub const SNAPSHOT_VERSION: u32 = 1;

/// Raw snapshot payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotBytes(Vec<u8>);

impl SnapshotBytes {
    /// Wrap raw bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the bytes
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    /// Payload length
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Byte-level equality
    pub fn equals(&self, other: &SnapshotBytes) -> bool {
        self.0 == other.0
    }

    /// First differing byte; the shorter length when one is a prefix of the other
    pub fn find_first_mismatch(&self, other: &SnapshotBytes) -> Option<usize> {
        if let Some(index) = self.0.iter().zip(&other.0).position(|(a, b)| a != b) {
            return Some(index);
        }
        (self.0.len() != other.0.len()).then(|| self.0.len().min(other.0.len()))
    }

    /// CRC32 of the payload
    pub fn payload_hash(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.0);
        hasher.finalize()
    }

    /// 4-byte little-endian count followed by the bytes
    pub fn write_length_prefixed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() + 4);
        out.extend_from_slice(&(self.0.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.0);
        out
    }

    /// Read a length-prefixed payload, rejecting counts above `max_bytes`.
    ///
    /// Returns the payload and the number of bytes consumed.
    pub fn read_length_prefixed(data: &[u8], max_bytes: usize) -> Result<(Self, usize)> {
        let header: [u8; 4] = data
            .get(..4)
            .and_then(|h| h.try_into().ok())
            .ok_or(BridgeError::SnapshotTruncated)?;
        let len = u32::from_le_bytes(header) as usize;
        if len > max_bytes {
            return Err(BridgeError::SnapshotTooLarge { len, max: max_bytes });
        }
        let body = data.get(4..4 + len).ok_or(BridgeError::SnapshotTruncated)?;
        Ok((Self(body.to_vec()), 4 + len))
    }
}

/// Captured state of one body
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyState {
    /// Body
    pub body_id: BodyId,
    /// Translation
    pub position: [f32; 3],
    /// Rotation (x, y, z, w)
    pub rotation: [f32; 4],
    /// Linear velocity
    pub linear_velocity: [f32; 3],
    /// Angular velocity
    pub angular_velocity: [f32; 3],
    /// Sleeping
    pub sleeping: bool,
    /// Gravity scale
    pub gravity_scale: f32,
}

/// Full simulation state, bodies ordered by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicsSnapshot {
    /// Payload format
    pub version: u32,
    /// Body states
    pub bodies: Vec<BodyState>,
}

impl PhysicsSnapshot {
    /// Build from body states; the order is normalized
    pub fn new(mut bodies: Vec<BodyState>) -> Self {
        bodies.sort_by_key(|b| b.body_id);
        Self {
            version: SNAPSHOT_VERSION,
            bodies,
        }
    }

    /// Encode with bincode
    pub fn encode(&self) -> Result<SnapshotBytes> {
        Ok(SnapshotBytes(bincode::serialize(self)?))
    }

    /// Decode with bincode
    pub fn decode(bytes: &SnapshotBytes) -> Result<Self> {
        let snapshot: Self = bincode::deserialize(&bytes.0)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(BridgeError::SnapshotDecode(Box::new(bincode::ErrorKind::Custom(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )))));
        }
        Ok(snapshot)
    }
}

/// Chooses which bodies a snapshot covers
pub trait SnapshotFilter {
    /// Whether the body is saved or restored
    fn should_save_body(&self, body: BodyId) -> bool;
}

/// Filter passing only listed bodies
#[derive(Debug, Clone, Default)]
pub struct BodyAllowList {
    allowed: HashSet<BodyId>,
}

impl BodyAllowList {
    /// Create from body ids
    pub fn new(bodies: impl IntoIterator<Item = BodyId>) -> Self {
        Self {
            allowed: bodies.into_iter().collect(),
        }
    }

    /// Add a body
    pub fn allow(&mut self, body: BodyId) {
        self.allowed.insert(body);
    }
}

impl SnapshotFilter for BodyAllowList {
    fn should_save_body(&self, body: BodyId) -> bool {
        self.allowed.contains(&body)
    }
}

#[derive(Debug, Clone, Default)]
struct SnapshotSlot {
    frame: Option<u32>,
    bytes: SnapshotBytes,
}

/// Fixed ring of snapshots keyed by frame
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    slots: Vec<SnapshotSlot>,
    last_saved: Option<u32>,
}

impl SnapshotHistory {
    /// Ring of at least `requested` slots, rounded up to a power of two
    pub fn new(requested: usize) -> Self {
        let capacity = requested.max(MIN_SNAPSHOT_CAPACITY).next_power_of_two();
        Self {
            slots: vec![SnapshotSlot::default(); capacity],
            last_saved: None,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot a frame maps to
    pub fn slot_index(&self, frame: u32) -> usize {
        frame as usize & (self.slots.len() - 1)
    }

    /// Store bytes for a frame, overwriting the slot
    pub fn store(&mut self, frame: u32, bytes: SnapshotBytes) {
        let index = self.slot_index(frame);
        self.slots[index] = SnapshotSlot {
            frame: Some(frame),
            bytes,
        };
        self.last_saved = Some(frame);
    }

    /// Bytes for a frame if the slot still holds it
    pub fn get(&self, frame: u32) -> Result<&SnapshotBytes> {
        let slot = &self.slots[self.slot_index(frame)];
        if slot.frame != Some(frame) {
            return Err(BridgeError::StaleSnapshot {
                frame,
                stored: slot.frame,
            });
        }
        if slot.bytes.is_empty() {
            return Err(BridgeError::EmptySnapshot(frame));
        }
        Ok(&slot.bytes)
    }

    /// Whether a restorable snapshot exists for the frame
    pub fn has_state_for_frame(&self, frame: u32) -> bool {
        self.get(frame).is_ok()
    }

    /// Most recently saved frame and its bytes
    pub fn last_saved(&self) -> Option<(u32, &SnapshotBytes)> {
        let frame = self.last_saved?;
        self.get(frame).ok().map(|bytes| (frame, bytes))
    }

    /// Forget every slot
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = SnapshotSlot::default());
        self.last_saved = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(v: &[u8]) -> SnapshotBytes {
        SnapshotBytes::new(v.to_vec())
    }

    #[test]
    fn test_capacity_rounding() {
        assert_eq!(SnapshotHistory::new(0).capacity(), 8);
        assert_eq!(SnapshotHistory::new(8).capacity(), 8);
        assert_eq!(SnapshotHistory::new(9).capacity(), 16);
        assert_eq!(SnapshotHistory::new(200).capacity(), 256);
    }

    #[test]
    fn test_stale_after_wrap() {
        let mut history = SnapshotHistory::new(8);
        assert!(!history.has_state_for_frame(3));

        history.store(3, bytes(&[1, 2, 3]));
        assert!(history.has_state_for_frame(3));

        history.store(11, bytes(&[4]));
        assert!(!history.has_state_for_frame(3));
        assert!(matches!(
            history.get(3),
            Err(BridgeError::StaleSnapshot {
                frame: 3,
                stored: Some(11)
            })
        ));
    }

    #[test]
    fn test_empty_payload_not_restorable() {
        let mut history = SnapshotHistory::new(8);
        history.store(1, SnapshotBytes::default());
        assert!(matches!(history.get(1), Err(BridgeError::EmptySnapshot(1))));
    }

    #[test]
    fn test_last_saved() {
        let mut history = SnapshotHistory::new(8);
        assert!(history.last_saved().is_none());
        history.store(5, bytes(&[9]));
        history.store(6, bytes(&[10]));
        assert_eq!(history.last_saved().map(|(f, b)| (f, b.as_bytes().to_vec())), Some((6, vec![10])));

        history.clear();
        assert!(history.last_saved().is_none());
        assert!(!history.has_state_for_frame(6));
    }

    #[test]
    fn test_mismatch_and_hash() {
        let a = bytes(&[1, 2, 3, 4]);
        let b = bytes(&[1, 2, 9, 4]);
        let c = bytes(&[1, 2]);

        assert_eq!(a.find_first_mismatch(&a), None);
        assert_eq!(a.find_first_mismatch(&b), Some(2));
        assert_eq!(a.find_first_mismatch(&c), Some(2));
        assert!(a.equals(&a.clone()));
        assert_eq!(a.payload_hash(), a.clone().payload_hash());
        assert_ne!(a.payload_hash(), b.payload_hash());
    }

    #[test]
    fn test_length_prefix() {
        let payload = bytes(&[7, 8, 9]);
        let wire = payload.write_length_prefixed();
        assert_eq!(&wire[..4], &[3, 0, 0, 0]);

        let (read, consumed) = SnapshotBytes::read_length_prefixed(&wire, 16).unwrap();
        assert_eq!(read, payload);
        assert_eq!(consumed, 7);

        assert!(matches!(
            SnapshotBytes::read_length_prefixed(&wire, 2),
            Err(BridgeError::SnapshotTooLarge { len: 3, max: 2 })
        ));
        assert!(matches!(
            SnapshotBytes::read_length_prefixed(&wire[..5], 16),
            Err(BridgeError::SnapshotTruncated)
        ));
    }

    #[test]
    fn test_snapshot_sorted_and_decodable() {
        let state = |id| BodyState {
            body_id: BodyId(id),
            position: [id as f32, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            linear_velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
            sleeping: false,
            gravity_scale: 1.0,
        };
        let snapshot = PhysicsSnapshot::new(vec![state(9), state(2)]);
        assert_eq!(snapshot.bodies[0].body_id, BodyId(2));

        let decoded = PhysicsSnapshot::decode(&snapshot.encode().unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
        assert!(PhysicsSnapshot::decode(&bytes(&[1])).is_err());
    }

    #[test]
    fn test_allow_list() {
        let filter = BodyAllowList::new([BodyId(1), BodyId(4)]);
        assert!(filter.should_save_body(BodyId(4)));
        assert!(!filter.should_save_body(BodyId(2)));
    }
}
