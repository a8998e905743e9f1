//! Packed per-instance state word.
//!
//! Every instanced render entity carries one 32-bit word per instance:
//!
//! ```text
//! 31            16 15          3   2        1        0
//! [ angle (u16)  ][  unused    ][moving][highlight][visible]
//! ```
//!
//! The angle is quantized over `[0, 2π)`. Batched geometry has no rotation and
//! uses a float level per vertex instead (see [`BatchLevel`]).

use std::f32::consts::TAU;

use bytemuck::{Pod, Zeroable};

pub const VISIBLE_BIT: u32 = 1 << 0;
pub const HIGHLIGHT_BIT: u32 = 1 << 1;
pub const MOVING_BIT: u32 = 1 << 2;
pub const FLAG_MASK: u32 = VISIBLE_BIT | HIGHLIGHT_BIT | MOVING_BIT;

const ANGLE_SHIFT: u32 = 16;
const ANGLE_STEPS: f32 = 65535.0;

/// Largest error the quantization may introduce, in radians.
pub const ANGLE_QUANTUM: f32 = TAU / ANGLE_STEPS;

/// Decoded form of a packed state word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceState {
    pub visible: bool,
    pub highlighted: bool,
    pub moving: bool,
    /// Rotation in radians, always in `[0, 2π)`.
    pub angle: f32,
}

impl InstanceState {
    pub fn pack(&self) -> u32 {
        pack(self.visible, self.highlighted, self.moving, self.angle)
    }
}

/// Wrap an angle into `[0, 2π)`.
pub fn normalize_angle(angle: f32) -> f32 {
    if !angle.is_finite() {
        return 0.0;
    }
    let wrapped = angle.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

pub fn quantize_angle(angle: f32) -> u32 {
    let turns = normalize_angle(angle) / TAU;
    ((turns * ANGLE_STEPS).round() as u32) & 0xFFFF
}

pub fn dequantize_angle(code: u32) -> f32 {
    normalize_angle((code & 0xFFFF) as f32 / ANGLE_STEPS * TAU)
}

pub fn pack(visible: bool, highlighted: bool, moving: bool, angle: f32) -> u32 {
    let mut word = quantize_angle(angle) << ANGLE_SHIFT;
    if visible {
        word |= VISIBLE_BIT;
    }
    if highlighted {
        word |= HIGHLIGHT_BIT;
    }
    if moving {
        word |= MOVING_BIT;
    }
    word
}

pub fn unpack(word: u32) -> InstanceState {
    InstanceState {
        visible: word & VISIBLE_BIT != 0,
        highlighted: word & HIGHLIGHT_BIT != 0,
        moving: word & MOVING_BIT != 0,
        angle: angle_of(word),
    }
}

pub fn angle_of(word: u32) -> f32 {
    dequantize_angle(word >> ANGLE_SHIFT)
}

pub fn with_angle(word: u32, angle: f32) -> u32 {
    (word & !(0xFFFF << ANGLE_SHIFT)) | (quantize_angle(angle) << ANGLE_SHIFT)
}

/// Additive angle update, renormalized.
pub fn rotate_by(word: u32, delta: f32) -> u32 {
    with_angle(word, angle_of(word) + delta)
}

fn with_bit(word: u32, bit: u32, on: bool) -> u32 {
    if on {
        word | bit
    } else {
        word & !bit
    }
}

pub fn with_visible(word: u32, visible: bool) -> u32 {
    with_bit(word, VISIBLE_BIT, visible)
}

pub fn with_highlighted(word: u32, highlighted: bool) -> u32 {
    with_bit(word, HIGHLIGHT_BIT, highlighted)
}

pub fn with_moving(word: u32, moving: bool) -> u32 {
    with_bit(word, MOVING_BIT, moving)
}

/// Shortest distance between two angles on the circle.
pub fn angular_distance(a: f32, b: f32) -> f32 {
    let d = normalize_angle(a - b);
    d.min(TAU - d)
}

/// One placement of an instanced shape, laid out exactly as the GPU reads it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct InstanceRecord {
    pub x: f32,
    pub y: f32,
    pub packed: u32,
}

impl InstanceRecord {
    pub fn new(x: f32, y: f32, packed: u32) -> Self {
        Self { x, y, packed }
    }

    pub fn state(&self) -> InstanceState {
        unpack(self.packed)
    }

    pub fn position(&self) -> crate::geometry::Point {
        crate::geometry::Point::new(self.x, self.y)
    }
}

/// Per-vertex state level used by batched geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLevel {
    Hidden,
    Normal,
    Highlighted,
    Moving,
}

impl BatchLevel {
    pub fn value(self) -> f32 {
        match self {
            BatchLevel::Hidden => 0.0,
            BatchLevel::Normal => 1.0,
            BatchLevel::Highlighted => 2.0,
            BatchLevel::Moving => 3.0,
        }
    }

    pub fn from_value(value: f32) -> Self {
        if value <= 0.5 {
            BatchLevel::Hidden
        } else if value < 1.5 {
            BatchLevel::Normal
        } else if value < 2.5 {
            BatchLevel::Highlighted
        } else {
            BatchLevel::Moving
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_pack_unpack_round_trip() {
        for flags in 0..8u32 {
            let (v, h, m) = (flags & 1 != 0, flags & 2 != 0, flags & 4 != 0);
            for i in 0..1000 {
                let angle = i as f32 / 1000.0 * TAU;
                let state = unpack(pack(v, h, m, angle));
                assert_eq!((state.visible, state.highlighted, state.moving), (v, h, m));
                assert!(
                    angular_distance(state.angle, angle) <= ANGLE_QUANTUM,
                    "angle {angle} decoded as {}",
                    state.angle
                );
                assert!(state.angle >= 0.0 && state.angle < TAU);
            }
        }
    }

    #[test]
    fn test_bit_layout() {
        assert_eq!(pack(true, false, false, 0.0), 1);
        assert_eq!(pack(false, true, false, 0.0), 2);
        assert_eq!(pack(false, false, true, 0.0), 4);
        assert_eq!(pack(false, false, false, PI) >> 16, 32768);
    }

    #[test]
    fn test_negative_angle_normalizes() {
        let word = pack(true, false, false, -FRAC_PI_2);
        assert!(angular_distance(angle_of(word), 3.0 * FRAC_PI_2) <= ANGLE_QUANTUM);
    }

    #[test]
    fn test_rotate_by_wraps() {
        let word = pack(true, true, false, 1.5 * PI);
        let rotated = rotate_by(word, PI);
        assert!(angular_distance(angle_of(rotated), FRAC_PI_2) <= 2.0 * ANGLE_QUANTUM);
        assert_eq!(rotated & FLAG_MASK, VISIBLE_BIT | HIGHLIGHT_BIT);
    }

    #[test]
    fn test_flag_helpers_leave_other_bits() {
        let word = pack(true, false, false, PI);
        let hidden = with_visible(word, false);
        assert_eq!(hidden & VISIBLE_BIT, 0);
        assert_eq!(hidden >> 16, word >> 16);
        assert_eq!(with_visible(hidden, true), word);
        assert_eq!(with_moving(with_moving(word, true), false), word);
    }

    #[test]
    fn test_batch_level_values() {
        for level in [
            BatchLevel::Hidden,
            BatchLevel::Normal,
            BatchLevel::Highlighted,
            BatchLevel::Moving,
        ] {
            assert_eq!(BatchLevel::from_value(level.value()), level);
        }
    }

    #[test]
    fn test_instance_record_is_three_words() {
        assert_eq!(std::mem::size_of::<InstanceRecord>(), 12);
    }
}
