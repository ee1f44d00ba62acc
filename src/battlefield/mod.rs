//! The battlefield model: fields, sects, combatants, and the garrison set
//! that drives opponent selection.
//!
//! This is the algorithmic heart of the engine. A [`Field`] owns an
//! ordered set of [`CombatantIdentity`] triples — the *garrison* — kept
//! sorted so that [`Field::get_opponents`] can answer "give me up to five
//! foes near this level, excluding anyone still protected" with range
//! scans instead of a linear search.

use std::collections::BTreeSet;

use crate::encoding::{Decode, Encode, EncodingError};
use crate::geometry::{Direction, FieldType, Pos, SectType};

pub mod opponent;

/// A player-visible identifier: the account number clients authenticate
/// with.
pub type Uin = u32;

/// A combatant's experience tier, used to band opponent selection.
pub type Level = u16;

/// Milliseconds since the Unix epoch.
pub type TimeStamp = i64;

/// Outcome of a handler call, mirrored onto the wire response.
///
/// `Ok` is the only non-error value; every other variant is a specific,
/// user-visible rejection a client can act on (retry elsewhere, wait out a
/// protection window, and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum Code {
    Ok = 0,
    Occupied = -1000,
    NotInBattle = -1001,
    InvalidDirection = -1002,
    JoinedBattle = -1003,
    InSameSect = -1004,
    InvalidOpponent = -1005,
    OpponentMoved = -1006,
    NoOpponent = -1007,
    NoOpponentFound = -1008,
    BattleFieldFull = -1009,
    CannotMove = -1011,
    CannotMoveToBornPos = -1012,
}

impl Code {
    /// The wire-level integer for this code.
    pub fn value(self) -> i16 {
        self as i16
    }

    /// True for [`Code::Ok`].
    pub fn is_ok(self) -> bool {
        matches!(self, Code::Ok)
    }
}

/// The garrison set's sort key: `(level asc, last_defeated_time desc, uin asc)`.
///
/// Ties are impossible in practice because `uin` is unique among joined
/// combatants, but the type is `Ord`-total regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatantIdentity {
    pub level: Level,
    pub last_defeated_time: TimeStamp,
    pub uin: Uin,
}

impl CombatantIdentity {
    pub fn new(level: Level, last_defeated_time: TimeStamp, uin: Uin) -> Self {
        Self {
            level,
            last_defeated_time,
            uin,
        }
    }
}

impl PartialOrd for CombatantIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CombatantIdentity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| other.last_defeated_time.cmp(&self.last_defeated_time))
            .then_with(|| self.uin.cmp(&other.uin))
    }
}

/// Handle into a field's garrison set. Stable while the entry is present;
/// reinserting under a new level or timestamp invalidates it and returns a
/// fresh one (see [`Field::update_garrison_level`]).
pub type GarrisonHandle = CombatantIdentity;

/// The persisted form of a combatant: what `combatant_map` stores per `uin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CombatantLite {
    pub pos: Pos,
    pub level: Level,
    pub last_defeated_time: TimeStamp,
}

impl CombatantLite {
    pub fn new(pos: Pos, level: Level) -> Self {
        Self {
            pos,
            level,
            last_defeated_time: 0,
        }
    }
}

impl Encode for CombatantLite {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.pos.encode_to(buf)?;
        self.level.encode_to(buf)?;
        self.last_defeated_time.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for CombatantLite {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (pos, n1) = Pos::decode_from(buf)?;
        let (level, n2) = Level::decode_from(&buf[n1..])?;
        let (last_defeated_time, n3) = TimeStamp::decode_from(&buf[n1 + n2..])?;
        Ok((
            CombatantLite {
                pos,
                level,
                last_defeated_time,
            },
            n1 + n2 + n3,
        ))
    }
}

/// Maximum cached opponents remembered per direction.
pub const MAX_OPPONENTS_PER_DIRECTION: usize = 5;

/// The persisted form of a combatant's cached opponent lists: a fixed
/// `[4][5]` grid of uins, zero-padded. `0` is never a valid `uin`, so it
/// doubles as the "empty slot" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpponentLite {
    slots: [[Uin; MAX_OPPONENTS_PER_DIRECTION]; 4],
}

impl Default for OpponentLite {
    fn default() -> Self {
        Self::empty()
    }
}

impl OpponentLite {
    /// An all-empty opponent grid.
    pub fn empty() -> Self {
        Self {
            slots: [[0; MAX_OPPONENTS_PER_DIRECTION]; 4],
        }
    }

    fn dir_index(d: Direction) -> usize {
        match d {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
        }
    }

    /// Overwrites the cached list for `direction`. Truncated to
    /// [`MAX_OPPONENTS_PER_DIRECTION`]; remaining slots are zeroed.
    pub fn set(&mut self, direction: Direction, opponents: &[Uin]) {
        let row = &mut self.slots[Self::dir_index(direction)];
        *row = [0; MAX_OPPONENTS_PER_DIRECTION];
        for (slot, uin) in row.iter_mut().zip(opponents.iter()) {
            *slot = *uin;
        }
    }

    /// Clears the cached list for `direction`.
    pub fn clear(&mut self, direction: Direction) {
        self.slots[Self::dir_index(direction)] = [0; MAX_OPPONENTS_PER_DIRECTION];
    }

    /// Returns the cached, non-zero uins for `direction`.
    pub fn get(&self, direction: Direction) -> Vec<Uin> {
        self.slots[Self::dir_index(direction)]
            .iter()
            .copied()
            .filter(|uin| *uin != 0)
            .collect()
    }

    /// True if every direction's cache is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|row| row.iter().all(|u| *u == 0))
    }
}

impl Encode for OpponentLite {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        for row in &self.slots {
            for uin in row {
                uin.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for OpponentLite {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut slots = [[0 as Uin; MAX_OPPONENTS_PER_DIRECTION]; 4];
        let mut offset = 0;
        for row in &mut slots {
            for slot in row.iter_mut() {
                let (uin, n) = Uin::decode_from(&buf[offset..])?;
                *slot = uin;
                offset += n;
            }
        }
        Ok((OpponentLite { slots }, offset))
    }
}

/// A single battlefield cell: an owner, an immutable type, and the
/// garrison of combatants currently standing on it.
pub struct Field {
    owner: SectType,
    kind: FieldType,
    garrison: BTreeSet<CombatantIdentity>,
}

impl Field {
    pub fn new(owner: SectType, kind: FieldType) -> Self {
        Self {
            owner,
            kind,
            garrison: BTreeSet::new(),
        }
    }

    pub fn owner(&self) -> SectType {
        self.owner
    }

    pub fn kind(&self) -> FieldType {
        self.kind
    }

    pub fn garrison_num(&self) -> usize {
        self.garrison.len()
    }

    pub fn change_owner(&mut self, new_owner: SectType) {
        self.owner = new_owner;
    }

    /// Inserts `uin` into the garrison, returning a handle stable until
    /// the entry is removed or reinserted under a new key.
    pub fn add_garrison(&mut self, uin: Uin, level: Level, last_defeated_time: TimeStamp) -> GarrisonHandle {
        let identity = CombatantIdentity::new(level, last_defeated_time, uin);
        self.garrison.insert(identity);
        identity
    }

    /// Removes the entry `handle` points at. `handle.uin` must equal `uin`.
    pub fn reduce_garrison(&mut self, uin: Uin, handle: GarrisonHandle) {
        debug_assert_eq!(handle.uin, uin, "garrison handle does not belong to uin");
        self.garrison.remove(&handle);
    }

    /// Reinserts the entry under `new_level`, preserving its
    /// `last_defeated_time`. Returns the new handle.
    pub fn update_garrison_level(
        &mut self,
        uin: Uin,
        new_level: Level,
        handle: GarrisonHandle,
    ) -> GarrisonHandle {
        debug_assert_eq!(handle.uin, uin);
        self.garrison.remove(&handle);
        let identity = CombatantIdentity::new(new_level, handle.last_defeated_time, uin);
        self.garrison.insert(identity);
        identity
    }

    /// Reinserts the entry under a new `last_defeated_time`, preserving
    /// its level. Returns the new handle.
    pub fn update_garrison_last_defeated_time(
        &mut self,
        uin: Uin,
        timestamp: TimeStamp,
        handle: GarrisonHandle,
    ) -> GarrisonHandle {
        debug_assert_eq!(handle.uin, uin);
        self.garrison.remove(&handle);
        let identity = CombatantIdentity::new(handle.level, timestamp, uin);
        self.garrison.insert(identity);
        identity
    }

    /// Finds up to `needs` eligible uins at exactly `level`, where
    /// eligible means `last_defeated_time <= defeated_before`.
    fn find_opponents_in_level(&self, level: Level, needs: usize, defeated_before: TimeStamp) -> Vec<Uin> {
        if needs == 0 {
            return Vec::new();
        }
        let lo = CombatantIdentity::new(level, defeated_before, Uin::MIN);
        let hi = CombatantIdentity::new(level, TimeStamp::MIN, Uin::MAX);
        let eligible: Vec<Uin> = self
            .garrison
            .range(lo..=hi)
            .map(|identity| identity.uin)
            .collect();
        opponent::sample(&eligible, needs)
    }

    /// Lowest and highest levels currently present in the garrison, if any.
    fn level_bounds(&self) -> Option<(Level, Level)> {
        let min = self.garrison.iter().map(|i| i.level).min()?;
        let max = self.garrison.iter().map(|i| i.level).max()?;
        Some((min, max))
    }

    /// Samples up to 5 opponents near `seeker_level`, excluding anyone
    /// defeated after `defeated_before`.
    ///
    /// Searches the exact level first, then expands outward by
    /// `±1, ±2, …` until either 5 opponents are found or both directions
    /// exceed the garrison's current level range.
    pub fn get_opponents(&self, seeker_level: Level, defeated_before: TimeStamp) -> Vec<Uin> {
        const TARGET: usize = MAX_OPPONENTS_PER_DIRECTION;

        let mut found = self.find_opponents_in_level(seeker_level, TARGET, defeated_before);
        if found.len() >= TARGET {
            return found;
        }

        let Some((min_level, max_level)) = self.level_bounds() else {
            return found;
        };

        let mut offset: i32 = 1;
        loop {
            let below = i32::from(seeker_level) - offset;
            let above = i32::from(seeker_level) + offset;
            let below_in_range = below >= i32::from(min_level);
            let above_in_range = above <= i32::from(max_level);
            if !below_in_range && !above_in_range {
                break;
            }

            if below_in_range {
                let needs = TARGET - found.len();
                let more = self.find_opponents_in_level(below as Level, needs, defeated_before);
                found.extend(more);
                if found.len() >= TARGET {
                    break;
                }
            }
            if above_in_range {
                let needs = TARGET - found.len();
                let more = self.find_opponents_in_level(above as Level, needs, defeated_before);
                found.extend(more);
                if found.len() >= TARGET {
                    break;
                }
            }
            offset += 1;
        }

        found
    }
}

/// One of the eight playable factions: its type, its born position, and
/// its current member roster.
pub struct Sect {
    kind: SectType,
    born_pos: Pos,
    members: std::collections::BTreeSet<Uin>,
}

impl Sect {
    pub fn new(kind: SectType, born_pos: Pos) -> Self {
        Self {
            kind,
            born_pos,
            members: std::collections::BTreeSet::new(),
        }
    }

    pub fn kind(&self) -> SectType {
        self.kind
    }

    pub fn born_pos(&self) -> Pos {
        self.born_pos
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn add_member(&mut self, uin: Uin) {
        self.members.insert(uin);
    }

    pub fn remove_member(&mut self, uin: Uin) {
        self.members.remove(&uin);
    }
}

/// A joined player: their sect, position, garrison handle, and the
/// opponent lists cached per movement direction.
pub struct Combatant {
    sect: SectType,
    pos: Pos,
    handle: GarrisonHandle,
    opponents: OpponentLite,
}

impl Combatant {
    pub fn new(sect: SectType, pos: Pos, handle: GarrisonHandle) -> Self {
        Self {
            sect,
            pos,
            handle,
            opponents: OpponentLite::empty(),
        }
    }

    pub fn current_sect(&self) -> SectType {
        self.sect
    }

    pub fn current_pos(&self) -> Pos {
        self.pos
    }

    pub fn handle(&self) -> GarrisonHandle {
        self.handle
    }

    pub fn level(&self) -> Level {
        self.handle.level
    }

    /// Moves to `pos` and clears every cached opponent list — the
    /// neighbourhood changed, so last move's cache no longer applies.
    pub fn move_to(&mut self, pos: Pos) {
        self.pos = pos;
        self.opponents = OpponentLite::empty();
    }

    pub fn set_handle(&mut self, handle: GarrisonHandle) {
        self.handle = handle;
    }

    pub fn change_sect(&mut self, new_sect: SectType) {
        self.sect = new_sect;
    }

    pub fn change_opponents(&mut self, direction: Direction, opponents: &[Uin]) {
        self.opponents.set(direction, opponents);
    }

    pub fn clear_opponents(&mut self, direction: Direction) {
        self.opponents.clear(direction);
    }

    pub fn get_opponents(&self, direction: Direction) -> Vec<Uin> {
        self.opponents.get(direction)
    }

    pub fn opponent_lite(&self) -> OpponentLite {
        self.opponents
    }

    pub fn set_opponent_lite(&mut self, lite: OpponentLite) {
        self.opponents = lite;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combatant_identity_orders_by_level_then_reverse_time_then_uin() {
        let a = CombatantIdentity::new(1, 100, 5);
        let b = CombatantIdentity::new(1, 200, 1);
        let c = CombatantIdentity::new(2, 0, 1);
        assert!(b < a, "higher last_defeated_time sorts first within a level");
        assert!(a < c, "lower level always sorts first");
    }

    #[test]
    fn garrison_round_trips_through_level_update() {
        let mut field = Field::new(SectType::None, FieldType::Default);
        let handle = field.add_garrison(42, 5, 0);
        assert_eq!(field.garrison_num(), 1);
        let handle = field.update_garrison_level(42, 9, handle);
        assert_eq!(handle.level, 9);
        assert_eq!(field.garrison_num(), 1);
        field.reduce_garrison(42, handle);
        assert_eq!(field.garrison_num(), 0);
    }

    #[test]
    fn get_opponents_excludes_protected_combatants() {
        let mut field = Field::new(SectType::Shaolin, FieldType::Default);
        field.add_garrison(1, 10, 1_000);
        let opponents = field.get_opponents(10, 500);
        assert!(opponents.is_empty(), "defeated after the cutoff, still protected");

        let opponents = field.get_opponents(10, 1_000);
        assert_eq!(opponents, vec![1]);
    }

    #[test]
    fn get_opponents_expands_outward_when_exact_level_is_short() {
        let mut field = Field::new(SectType::Shaolin, FieldType::Default);
        field.add_garrison(1, 9, 0);
        field.add_garrison(2, 10, 0);
        field.add_garrison(3, 11, 0);
        let opponents = field.get_opponents(10, i64::MAX);
        assert_eq!(opponents.len(), 3);
    }

    #[test]
    fn opponent_lite_round_trips_through_encoding() {
        let mut lite = OpponentLite::empty();
        lite.set(Direction::Up, &[1, 2, 3]);
        let bytes = crate::encoding::encode_to_vec(&lite).unwrap();
        let (decoded, _) = crate::encoding::decode_from_slice::<OpponentLite>(&bytes).unwrap();
        assert_eq!(decoded.get(Direction::Up), vec![1, 2, 3]);
        assert!(decoded.get(Direction::Down).is_empty());
    }

    #[test]
    fn combatant_lite_round_trips_through_encoding() {
        let lite = CombatantLite {
            pos: Pos::new(3, 4),
            level: 7,
            last_defeated_time: 12345,
        };
        let bytes = crate::encoding::encode_to_vec(&lite).unwrap();
        let (decoded, _) = crate::encoding::decode_from_slice::<CombatantLite>(&bytes).unwrap();
        assert_eq!(decoded, lite);
    }
}
