//! Battlefield geometry — grid positions, movement directions, and the
//! enumerations that tag a cell or a combatant.
//!
//! [`Pos`] is a plain-old-data pair of coordinates, small enough to copy by
//! value everywhere; it carries no behaviour beyond movement and ordering.

use crate::encoding::{self, Decode, Encode, EncodingError};

/// Width and height of the square battlefield grid.
pub const GRID_SIZE: i16 = 10;

/// A cell coordinate on the battlefield grid, `0..GRID_SIZE` on each axis.
///
/// `Pos` is `Copy` and carries no allocation; it is the key type for every
/// field-indexed persistence map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pos {
    x: i16,
    y: i16,
}

impl Pos {
    /// Creates a new position without bounds-checking.
    ///
    /// Out-of-grid positions are representable (useful for the "move would
    /// leave the grid" edge case) but [`Pos::valid`] reports them as such.
    pub fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    /// X coordinate.
    pub fn x(&self) -> i16 {
        self.x
    }

    /// Y coordinate.
    pub fn y(&self) -> i16 {
        self.y
    }

    /// True if both coordinates fall within `0..GRID_SIZE`.
    pub fn valid(&self) -> bool {
        (0..GRID_SIZE).contains(&self.x) && (0..GRID_SIZE).contains(&self.y)
    }

    /// Returns the position reached by moving one cell in `direction`,
    /// along with whether that position is still on the grid.
    ///
    /// The returned `Pos` is always computed (even off-grid), so callers
    /// can decide how to react to an out-of-bounds move without losing the
    /// attempted destination.
    pub fn apply(&self, direction: Direction) -> (Pos, bool) {
        let next = match direction {
            Direction::Up => Pos::new(self.x, self.y - 1),
            Direction::Down => Pos::new(self.x, self.y + 1),
            Direction::Left => Pos::new(self.x - 1, self.y),
            Direction::Right => Pos::new(self.x + 1, self.y),
        };
        let valid = next.valid();
        (next, valid)
    }

    /// Linearises the position into a single ordering weight, `x + y*10`,
    /// used to rank positions in the canonical row-major iteration order
    /// the backup and admin routines rely on.
    fn rank(&self) -> i32 {
        i32::from(self.x) + i32::from(self.y) * i32::from(GRID_SIZE)
    }
}

impl PartialOrd for Pos {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pos {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl Encode for Pos {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.x.encode_to(buf)?;
        self.y.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Pos {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (x, n1) = i16::decode_from(buf)?;
        let (y, n2) = i16::decode_from(&buf[n1..])?;
        Ok((Pos::new(x, y), n1 + n2))
    }
}

/// One of the four cardinal movement directions a combatant may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// All four directions, in a stable order used wherever opponents are
    /// enumerated per-direction (e.g. [`crate::battlefield::OpponentLite`]).
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    fn tag(self) -> u8 {
        match self {
            Direction::Up => 1,
            Direction::Down => 2,
            Direction::Left => 3,
            Direction::Right => 4,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Direction::Up),
            2 => Some(Direction::Down),
            3 => Some(Direction::Left),
            4 => Some(Direction::Right),
            _ => None,
        }
    }
}

impl Encode for Direction {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.tag().encode_to(buf)
    }
}

impl Decode for Direction {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u8::decode_from(buf)?;
        let dir = Direction::from_tag(tag).ok_or(EncodingError::InvalidTag {
            tag: u32::from(tag),
            type_name: "Direction",
        })?;
        Ok((dir, n))
    }
}

/// Which of the eight sects a combatant or a field's garrison belongs to.
///
/// `None` (value `0`) means "not yet assigned"; it is never a legal
/// membership for a joined combatant but is the zero-value used when a
/// field has no owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SectType {
    #[default]
    None = 0,
    Shaolin = 1,
    WuDang = 2,
    KunLun = 3,
    EMei = 4,
    HuaShan = 5,
    KongTong = 6,
    MingJiao = 7,
    GaiBang = 8,
}

impl SectType {
    /// All eight joinable sects, excluding [`SectType::None`], in ascending
    /// discriminant order — the order the random-assignment and the admin
    /// per-sect listing both iterate in.
    pub const ALL: [SectType; 8] = [
        SectType::Shaolin,
        SectType::WuDang,
        SectType::KunLun,
        SectType::EMei,
        SectType::HuaShan,
        SectType::KongTong,
        SectType::MingJiao,
        SectType::GaiBang,
    ];

    fn tag(self) -> u8 {
        self as u8
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SectType::None),
            1 => Some(SectType::Shaolin),
            2 => Some(SectType::WuDang),
            3 => Some(SectType::KunLun),
            4 => Some(SectType::EMei),
            5 => Some(SectType::HuaShan),
            6 => Some(SectType::KongTong),
            7 => Some(SectType::MingJiao),
            8 => Some(SectType::GaiBang),
            _ => None,
        }
    }
}

impl Encode for SectType {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.tag().encode_to(buf)
    }
}

impl Decode for SectType {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u8::decode_from(buf)?;
        let sect = SectType::from_tag(tag).ok_or(EncodingError::InvalidTag {
            tag: u32::from(tag),
            type_name: "SectType",
        })?;
        Ok((sect, n))
    }
}

/// Distinguishes a sect's protected born field from an ordinary contestable
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// An ordinary field: ownership changes when its garrison is emptied
    /// and re-seeded, and it may be moved into and out of freely.
    Default,
    /// A sect's born field: the sect's members cannot move out past it in
    /// a way that would abandon it, and combatants may never move *into*
    /// another sect's born field.
    BornField,
}

impl Encode for FieldType {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let tag: u8 = match self {
            FieldType::Default => 0,
            FieldType::BornField => 1,
        };
        tag.encode_to(buf)
    }
}

impl Decode for FieldType {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u8::decode_from(buf)?;
        let ty = match tag {
            0 => FieldType::Default,
            1 => FieldType::BornField,
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: u32::from(other),
                    type_name: "FieldType",
                });
            }
        };
        Ok((ty, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_moves_one_cell_per_direction() {
        let p = Pos::new(5, 5);
        assert_eq!(p.apply(Direction::Up), (Pos::new(5, 4), true));
        assert_eq!(p.apply(Direction::Down), (Pos::new(5, 6), true));
        assert_eq!(p.apply(Direction::Left), (Pos::new(4, 5), true));
        assert_eq!(p.apply(Direction::Right), (Pos::new(6, 5), true));
    }

    #[test]
    fn apply_off_grid_reports_invalid_but_still_returns_a_position() {
        let corner = Pos::new(0, 0);
        let (next, valid) = corner.apply(Direction::Up);
        assert_eq!(next, Pos::new(0, -1));
        assert!(!valid);
        assert!(!next.valid());
    }

    #[test]
    fn ordering_is_row_major() {
        let a = Pos::new(9, 0);
        let b = Pos::new(0, 1);
        assert!(a < b, "(9,0) ranks before (0,1) in row-major order");
    }

    #[test]
    fn pos_roundtrips_through_encoding() {
        let p = Pos::new(-3, 7);
        let bytes = encoding::encode_to_vec(&p).unwrap();
        let (decoded, consumed) = encoding::decode_from_slice::<Pos>(&bytes).unwrap();
        assert_eq!(decoded, p);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn sect_type_roundtrips_through_encoding() {
        for sect in SectType::ALL {
            let bytes = encoding::encode_to_vec(&sect).unwrap();
            let (decoded, _) = encoding::decode_from_slice::<SectType>(&bytes).unwrap();
            assert_eq!(decoded, sect);
        }
    }

    #[test]
    fn direction_roundtrips_through_encoding() {
        for dir in Direction::ALL {
            let bytes = encoding::encode_to_vec(&dir).unwrap();
            let (decoded, _) = encoding::decode_from_slice::<Direction>(&bytes).unwrap();
            assert_eq!(decoded, dir);
        }
    }
}
