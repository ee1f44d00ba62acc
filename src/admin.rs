//! A read/write facade over [`crate::engine::Engine`] for whatever
//! out-of-process observer ends up calling it — the original exposed this
//! through a small built-in HTTP server; this crate stops at the typed
//! surface and leaves wiring a listener to the embedder.
//!
//! Every method here either inspects engine state without mutating it, or
//! performs the one mutation an operator needs (force a backup, evict a
//! combatant) — never anything a normal client request already covers.

use serde::Serialize;

use crate::backup::routine::BackupRoutine;
use crate::battlefield::{Level, TimeStamp, Uin};
use crate::engine::Engine;
use crate::geometry::{Pos, SectType};

/// Snapshot of the whole server for a `/status`-style query.
#[derive(Debug, Serialize)]
pub struct ServerStatus {
    pub combatant_count: usize,
    pub sect_count: usize,
    pub last_season_reset_time: TimeStamp,
    pub backup_in_flight: bool,
    pub join_calls: u64,
    pub query_battle_field_calls: u64,
    pub move_calls: u64,
    pub change_sect_calls: u64,
    pub change_opponent_calls: u64,
    pub check_fight_calls: u64,
    pub report_fight_calls: u64,
    pub rejected_calls: u64,
}

/// One cell's ownership and occupancy, for a `/field?x&y` query.
#[derive(Debug, Serialize)]
pub struct FieldStatus {
    pub owner: Option<String>,
    pub garrison_num: usize,
}

/// One combatant's public state, for a `/player?uin` query.
#[derive(Debug, Serialize)]
pub struct PlayerStatus {
    pub uin: Uin,
    pub sect: String,
    pub x: i16,
    pub y: i16,
    pub level: Level,
    pub last_defeated_time: TimeStamp,
}

/// One sect's roster size, for a `/sect?type` query.
#[derive(Debug, Serialize)]
pub struct SectStatus {
    pub sect: String,
    pub member_count: usize,
}

fn sect_name(sect: SectType) -> String {
    format!("{sect:?}")
}

/// Read/write observer over a running [`Engine`], handed the engine by
/// reference for the duration of each call rather than owning it.
pub struct AdminView<'a> {
    engine: &'a mut Engine,
    backup: &'a mut BackupRoutine,
}

impl<'a> AdminView<'a> {
    pub fn new(engine: &'a mut Engine, backup: &'a mut BackupRoutine) -> Self {
        Self { engine, backup }
    }

    pub fn status(&self) -> ServerStatus {
        let stats = &self.engine.stats;
        ServerStatus {
            combatant_count: self.engine.combatants.len(),
            sect_count: self.engine.sects.len(),
            last_season_reset_time: stats.last_season_reset_time,
            backup_in_flight: self.backup.in_flight(),
            join_calls: stats.join_calls,
            query_battle_field_calls: stats.query_battle_field_calls,
            move_calls: stats.move_calls,
            change_sect_calls: stats.change_sect_calls,
            change_opponent_calls: stats.change_opponent_calls,
            check_fight_calls: stats.check_fight_calls,
            report_fight_calls: stats.report_fight_calls,
            rejected_calls: stats.rejected_calls,
        }
    }

    pub fn field(&self, pos: Pos) -> Option<FieldStatus> {
        let field = self.engine.fields.get(&pos)?;
        let owner = (field.owner() != SectType::None).then(|| sect_name(field.owner()));
        Some(FieldStatus {
            owner,
            garrison_num: field.garrison_num(),
        })
    }

    pub fn player(&self, uin: Uin) -> Option<PlayerStatus> {
        let combatant = self.engine.combatants.get(&uin)?;
        let pos = combatant.current_pos();
        Some(PlayerStatus {
            uin,
            sect: sect_name(combatant.current_sect()),
            x: pos.x(),
            y: pos.y(),
            level: combatant.level(),
            last_defeated_time: combatant.handle().last_defeated_time,
        })
    }

    pub fn sect(&self, sect: SectType) -> Option<SectStatus> {
        let entry = self.engine.sects.get(&sect)?;
        Some(SectStatus {
            sect: sect_name(entry.kind()),
            member_count: entry.member_count(),
        })
    }

    /// Queues a backup unless one is already in flight or pending. The
    /// embedder's tick loop is responsible for actually noticing
    /// [`BackupRoutine::is_pending`] and calling [`BackupRoutine::run`] with
    /// its own key-value client and region snapshots; this call only
    /// records the request.
    pub fn force_backup(&mut self) -> bool {
        let accepted = self.backup.request_backup();
        if accepted {
            tracing::info!("admin-triggered backup requested");
        }
        accepted
    }

    pub fn remove_combatant(&mut self, uin: Uin) -> bool {
        self.engine.remove_combatant(uin).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::wire::Request;
    use tempfile::tempdir;

    fn test_engine() -> (Engine, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = EngineConfig {
            data_dir: dir.path().to_path_buf(),
            rng_seed: Some(1),
            ..EngineConfig::default()
        };
        (Engine::open(config).unwrap(), dir)
    }

    #[test]
    fn status_reflects_join_count() {
        let (mut engine, _dir) = test_engine();
        engine.handle(Request::Join { uin: 1, level: 10 }).unwrap();
        let mut routine = BackupRoutine::new();
        let view = AdminView::new(&mut engine, &mut routine);
        let status = view.status();
        assert_eq!(status.combatant_count, 1);
        assert_eq!(status.join_calls, 1);
        assert!(!status.backup_in_flight);
    }

    #[test]
    fn player_and_field_report_consistent_state() {
        let (mut engine, _dir) = test_engine();
        engine.handle(Request::Join { uin: 7, level: 3 }).unwrap();
        let pos = engine.combatants[&7].current_pos();
        let mut routine = BackupRoutine::new();
        let view = AdminView::new(&mut engine, &mut routine);

        let player = view.player(7).unwrap();
        assert_eq!(player.level, 3);
        assert_eq!((player.x, player.y), (pos.x(), pos.y()));

        let field = view.field(pos).unwrap();
        assert_eq!(field.garrison_num, 1);
        assert_eq!(field.owner, Some(player.sect));
    }

    #[test]
    fn remove_combatant_clears_the_field() {
        let (mut engine, _dir) = test_engine();
        engine.handle(Request::Join { uin: 9, level: 1 }).unwrap();
        let pos = engine.combatants[&9].current_pos();
        let mut routine = BackupRoutine::new();
        let mut view = AdminView::new(&mut engine, &mut routine);

        assert!(view.remove_combatant(9));
        assert!(view.player(9).is_none());
        assert_eq!(view.field(pos).unwrap().garrison_num, 0);
        assert!(!view.remove_combatant(9), "already removed");
    }

    #[test]
    fn unknown_uin_and_sect_lookups_are_none() {
        let (mut engine, _dir) = test_engine();
        let mut routine = BackupRoutine::new();
        let view = AdminView::new(&mut engine, &mut routine);
        assert!(view.player(404).is_none());
        assert!(view.sect(SectType::Shaolin).is_some());
    }

    #[test]
    fn force_backup_queues_a_request_the_status_reports() {
        let (mut engine, _dir) = test_engine();
        let mut routine = BackupRoutine::new();
        let mut view = AdminView::new(&mut engine, &mut routine);

        assert!(view.force_backup());
        assert!(!view.force_backup(), "already pending");
        assert!(routine.is_pending());
    }
}
