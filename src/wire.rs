//! The typed request/response boundary the (out-of-scope) datagram codec
//! decodes into and encodes from.
//!
//! [`Engine::handle`](crate::engine::Engine::handle) is the single dispatch
//! entry point an embedder's transport layer calls once it has decoded a
//! wrapper `{name, payload}` record into one of these [`Request`] variants.

use crate::battlefield::{Code, Level, Uin};
use crate::geometry::{Direction, Pos, SectType};

/// A full snapshot of the 100-cell battlefield, carried on almost every
/// response.
///
/// `sect_counts` has exactly eight entries, one per [`SectType::ALL`]
/// member in order — never a ninth bucket for [`SectType::None`], per the
/// wire contract every response must uphold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleField {
    /// The responding combatant's own position, or `None` if not joined.
    pub self_position: Option<Pos>,
    /// Owners of all 100 cells, in row-major order (`y * 10 + x`).
    pub cells: Vec<SectType>,
    /// Member counts for `SectType::ALL`, in that fixed order.
    pub sect_counts: [u32; 8],
}

/// One decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Join {
        uin: Uin,
        level: Level,
    },
    QueryBattleField {
        uin: Uin,
        level: Level,
    },
    Move {
        uin: Uin,
        level: Level,
        direction: Direction,
        can_move: bool,
    },
    ChangeSect {
        uin: Uin,
        level: Level,
        sect: SectType,
    },
    ChangeOpponent {
        uin: Uin,
        level: Level,
        direction: Direction,
    },
    CheckFight {
        uin: Uin,
        opponent: Uin,
        direction: Direction,
    },
    ReportFight {
        uin: Uin,
        opponent: Uin,
        loser: Uin,
        direction: Direction,
        reset_self: bool,
        reset_opponent: bool,
        level: Level,
        opponent_level: Level,
    },
}

/// The response to a [`Request`].
///
/// Every variant carries `uin` and `code`; most also carry a
/// [`BattleField`] snapshot, and `Move`/`ChangeOpponent` additionally carry
/// the sampled/cached opponent list when `code == Occupied`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Join {
        uin: Uin,
        code: Code,
        sect: SectType,
        battle_field: BattleField,
    },
    QueryBattleField {
        uin: Uin,
        code: Code,
        battle_field: BattleField,
    },
    Move {
        uin: Uin,
        code: Code,
        opponents: Vec<Uin>,
        battle_field: BattleField,
    },
    ChangeSect {
        uin: Uin,
        code: Code,
        battle_field: BattleField,
    },
    ChangeOpponent {
        uin: Uin,
        code: Code,
        opponents: Vec<Uin>,
        battle_field: BattleField,
    },
    CheckFight {
        uin: Uin,
        code: Code,
    },
    ReportFight {
        uin: Uin,
        code: Code,
        battle_field: BattleField,
    },
}

impl Response {
    /// The [`Code`] every variant carries, regardless of kind.
    pub fn code(&self) -> Code {
        match self {
            Response::Join { code, .. }
            | Response::QueryBattleField { code, .. }
            | Response::Move { code, .. }
            | Response::ChangeSect { code, .. }
            | Response::ChangeOpponent { code, .. }
            | Response::CheckFight { code, .. }
            | Response::ReportFight { code, .. } => *code,
        }
    }
}
