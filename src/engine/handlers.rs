//! The seven request handlers, one method per [`crate::wire::Request`]
//! variant. Each takes its typed fields directly rather than the enum, so
//! [`Engine::handle`] stays a thin match arm.

use crate::battlefield::{Code, Level, TimeStamp, Uin};
use crate::geometry::{Direction, Pos, SectType};
use crate::wire::{BattleField, Request, Response};

use super::{Engine, EngineError};

impl Engine {
    /// Dispatches a decoded [`Request`] to its handler.
    pub fn handle(&mut self, request: Request) -> Result<Response, EngineError> {
        match request {
            Request::Join { uin, level } => self.join(uin, level),
            Request::QueryBattleField { uin, level } => self.query_battle_field(uin, level),
            Request::Move {
                uin,
                level,
                direction,
                can_move,
            } => self.move_combatant(uin, level, direction, can_move),
            Request::ChangeSect { uin, level, sect } => self.change_sect(uin, level, sect),
            Request::ChangeOpponent {
                uin,
                level,
                direction,
            } => self.change_opponent(uin, level, direction),
            Request::CheckFight {
                uin,
                opponent,
                direction,
            } => self.check_fight(uin, opponent, direction),
            Request::ReportFight {
                uin,
                opponent,
                loser,
                direction,
                reset_self,
                reset_opponent,
                level,
                opponent_level,
            } => self.report_fight(
                uin,
                opponent,
                loser,
                direction,
                reset_self,
                reset_opponent,
                level,
                opponent_level,
            ),
        }
    }

    /// Snapshot of every cell's owner and every sect's member count.
    ///
    /// `self_position` is `None` for callers who have not joined. The 100
    /// cells are emitted in row-major order, matching [`Pos`]'s `Ord`.
    pub(crate) fn battle_field_snapshot(&self, self_position: Option<Pos>) -> BattleField {
        let mut positions: Vec<Pos> = self.fields.keys().copied().collect();
        positions.sort();
        let cells = positions
            .into_iter()
            .map(|pos| self.fields[&pos].owner())
            .collect();

        let mut sect_counts = [0u32; 8];
        for (i, sect) in SectType::ALL.iter().enumerate() {
            sect_counts[i] = self.sects.get(sect).map(|s| s.member_count() as u32).unwrap_or(0);
        }

        BattleField {
            self_position,
            cells,
            sect_counts,
        }
    }

    fn join(&mut self, uin: Uin, level: Level) -> Result<Response, EngineError> {
        self.stats.join_calls += 1;

        if let Some(combatant) = self.combatants.get(&uin) {
            let sect = combatant.current_sect();
            let born_pos = self.sects[&sect].born_pos();
            let code = if combatant.current_pos() == born_pos {
                Code::Ok
            } else {
                Code::JoinedBattle
            };
            return Ok(Response::Join {
                uin,
                code,
                sect,
                battle_field: self.battle_field_snapshot(Some(combatant.current_pos())),
            });
        }

        if self.combatant_map.is_full() {
            self.stats.rejected_calls += 1;
            return Ok(Response::Join {
                uin,
                code: Code::BattleFieldFull,
                sect: SectType::None,
                battle_field: self.battle_field_snapshot(None),
            });
        }

        let sect = self.random_sect();
        let born_pos = self.sects[&sect].born_pos();

        let field = self.fields.get_mut(&born_pos).expect("born field exists");
        let handle = field.add_garrison(uin, level, 0);

        let combatant = crate::battlefield::Combatant::new(sect, born_pos, handle);
        self.combatants.insert(uin, combatant);
        self.sects.get_mut(&sect).expect("sect exists").add_member(uin);

        self.persist_combatant(uin)?;

        Ok(Response::Join {
            uin,
            code: Code::Ok,
            sect,
            battle_field: self.battle_field_snapshot(Some(born_pos)),
        })
    }

    fn query_battle_field(&mut self, uin: Uin, level: Level) -> Result<Response, EngineError> {
        self.stats.query_battle_field_calls += 1;

        let Some(combatant) = self.combatants.get(&uin) else {
            return Ok(Response::QueryBattleField {
                uin,
                code: Code::NotInBattle,
                battle_field: self.battle_field_snapshot(None),
            });
        };
        let pos = combatant.current_pos();
        let handle = combatant.handle();

        if handle.level != level {
            let field = self.fields.get_mut(&pos).expect("combatant stands on an existing field");
            let new_handle = field.update_garrison_level(uin, level, handle);
            self.combatants.get_mut(&uin).expect("checked above").set_handle(new_handle);
            self.persist_combatant(uin)?;
        }

        Ok(Response::QueryBattleField {
            uin,
            code: Code::Ok,
            battle_field: self.battle_field_snapshot(Some(pos)),
        })
    }

    fn move_combatant(
        &mut self,
        uin: Uin,
        level: Level,
        direction: Direction,
        can_move: bool,
    ) -> Result<Response, EngineError> {
        self.stats.move_calls += 1;

        let Some(combatant) = self.combatants.get(&uin) else {
            return Ok(Response::Move {
                uin,
                code: Code::NotInBattle,
                opponents: Vec::new(),
                battle_field: self.battle_field_snapshot(None),
            });
        };
        let current_pos = combatant.current_pos();
        let sect = combatant.current_sect();

        let (new_pos, in_bounds) = current_pos.apply(direction);
        if !in_bounds {
            return Ok(Response::Move {
                uin,
                code: Code::InvalidDirection,
                opponents: Vec::new(),
                battle_field: self.battle_field_snapshot(Some(current_pos)),
            });
        }

        let owner = self.fields[&new_pos].owner();

        if owner == SectType::None || owner == sect {
            if !can_move {
                return Ok(Response::Move {
                    uin,
                    code: Code::CannotMove,
                    opponents: Vec::new(),
                    battle_field: self.battle_field_snapshot(Some(current_pos)),
                });
            }
            self.perform_move(uin, current_pos, new_pos, level, sect)?;
            return Ok(Response::Move {
                uin,
                code: Code::Ok,
                opponents: Vec::new(),
                battle_field: self.battle_field_snapshot(Some(new_pos)),
            });
        }

        let cached = self.combatants[&uin].get_opponents(direction);
        let opponents = if !cached.is_empty() {
            cached
        } else {
            let not_in_protection = self.last_time_not_in_protection();
            self.fields[&new_pos].get_opponents(level, not_in_protection)
        };

        if !opponents.is_empty() {
            self.combatants
                .get_mut(&uin)
                .expect("checked above")
                .change_opponents(direction, &opponents);
            self.persist_opponents(uin)?;
            return Ok(Response::Move {
                uin,
                code: Code::Occupied,
                opponents,
                battle_field: self.battle_field_snapshot(Some(current_pos)),
            });
        }

        let defending_field = &self.fields[&new_pos];
        let code = if defending_field.garrison_num() > 0 {
            Code::NoOpponentFound
        } else if self.sects[&owner].born_pos() == new_pos {
            Code::CannotMoveToBornPos
        } else if !can_move {
            Code::CannotMove
        } else {
            self.perform_move(uin, current_pos, new_pos, level, sect)?;
            return Ok(Response::Move {
                uin,
                code: Code::Ok,
                opponents: Vec::new(),
                battle_field: self.battle_field_snapshot(Some(new_pos)),
            });
        };

        Ok(Response::Move {
            uin,
            code,
            opponents: Vec::new(),
            battle_field: self.battle_field_snapshot(Some(current_pos)),
        })
    }

    /// Relocates `uin` from `from` to `to`, transferring `to`'s ownership
    /// to `sect` if it differs, and persisting the new combatant position
    /// and (if changed) the new owner.
    fn perform_move(
        &mut self,
        uin: Uin,
        from: Pos,
        to: Pos,
        level: Level,
        sect: SectType,
    ) -> Result<(), EngineError> {
        let handle = self.combatants[&uin].handle();
        self.fields.get_mut(&from).expect("combatant's current field exists").reduce_garrison(uin, handle);

        let new_handle = self
            .fields
            .get_mut(&to)
            .expect("destination field exists")
            .add_garrison(uin, level, 0);

        let previous_owner = self.fields[&to].owner();
        if previous_owner != sect {
            self.fields.get_mut(&to).expect("destination field exists").change_owner(sect);
            tracing::info!(?to, from = ?previous_owner, to_owner = ?sect, "field owner changed");
            self.persist_owner(to, sect)?;
        }

        let combatant = self.combatants.get_mut(&uin).expect("checked by caller");
        combatant.move_to(to);
        combatant.set_handle(new_handle);
        self.persist_combatant(uin)?;
        self.persist_opponents(uin)?;
        Ok(())
    }

    fn change_sect(&mut self, uin: Uin, level: Level, sect: SectType) -> Result<Response, EngineError> {
        self.stats.change_sect_calls += 1;

        let Some(combatant) = self.combatants.get(&uin) else {
            return Ok(Response::ChangeSect {
                uin,
                code: Code::NotInBattle,
                battle_field: self.battle_field_snapshot(None),
            });
        };
        let current_sect = combatant.current_sect();
        let current_pos = combatant.current_pos();

        if sect == current_sect {
            return Ok(Response::ChangeSect {
                uin,
                code: Code::InSameSect,
                battle_field: self.battle_field_snapshot(Some(current_pos)),
            });
        }

        self.sects.get_mut(&current_sect).expect("sect exists").remove_member(uin);
        self.sects.get_mut(&sect).expect("sect exists").add_member(uin);

        let born_pos = self.sects[&sect].born_pos();
        self.perform_move(uin, current_pos, born_pos, level, sect)?;
        self.combatants.get_mut(&uin).expect("checked above").change_sect(sect);

        Ok(Response::ChangeSect {
            uin,
            code: Code::Ok,
            battle_field: self.battle_field_snapshot(Some(born_pos)),
        })
    }

    fn change_opponent(
        &mut self,
        uin: Uin,
        level: Level,
        direction: Direction,
    ) -> Result<Response, EngineError> {
        self.stats.change_opponent_calls += 1;

        let Some(combatant) = self.combatants.get(&uin) else {
            return Ok(Response::ChangeOpponent {
                uin,
                code: Code::NotInBattle,
                opponents: Vec::new(),
                battle_field: self.battle_field_snapshot(None),
            });
        };
        let current_pos = combatant.current_pos();

        if combatant.get_opponents(direction).is_empty() {
            return Ok(Response::ChangeOpponent {
                uin,
                code: Code::NoOpponent,
                opponents: Vec::new(),
                battle_field: self.battle_field_snapshot(Some(current_pos)),
            });
        }

        let (neighbor, in_bounds) = current_pos.apply(direction);
        if !in_bounds {
            return Ok(Response::ChangeOpponent {
                uin,
                code: Code::InvalidDirection,
                opponents: Vec::new(),
                battle_field: self.battle_field_snapshot(Some(current_pos)),
            });
        }

        let not_in_protection = self.last_time_not_in_protection();
        let opponents = self.fields[&neighbor].get_opponents(level, not_in_protection);

        if opponents.is_empty() {
            return Ok(Response::ChangeOpponent {
                uin,
                code: Code::NoOpponentFound,
                opponents: Vec::new(),
                battle_field: self.battle_field_snapshot(Some(current_pos)),
            });
        }

        self.combatants
            .get_mut(&uin)
            .expect("checked above")
            .change_opponents(direction, &opponents);
        self.persist_opponents(uin)?;

        Ok(Response::ChangeOpponent {
            uin,
            code: Code::Ok,
            opponents,
            battle_field: self.battle_field_snapshot(Some(current_pos)),
        })
    }

    fn check_fight(&mut self, uin: Uin, opponent: Uin, direction: Direction) -> Result<Response, EngineError> {
        self.stats.check_fight_calls += 1;

        let Some(seeker) = self.combatants.get(&uin) else {
            return Ok(Response::CheckFight {
                uin,
                code: Code::NotInBattle,
            });
        };
        let Some(opponent_combatant) = self.combatants.get(&opponent) else {
            return Ok(Response::CheckFight {
                uin,
                code: Code::InvalidOpponent,
            });
        };

        if !seeker.get_opponents(direction).contains(&opponent) {
            return Ok(Response::CheckFight {
                uin,
                code: Code::InvalidOpponent,
            });
        }

        let (expected_pos, in_bounds) = seeker.current_pos().apply(direction);
        if !in_bounds {
            return Ok(Response::CheckFight {
                uin,
                code: Code::InvalidDirection,
            });
        }
        if opponent_combatant.current_pos() != expected_pos {
            return Ok(Response::CheckFight {
                uin,
                code: Code::OpponentMoved,
            });
        }

        Ok(Response::CheckFight { uin, code: Code::Ok })
    }

    #[allow(clippy::too_many_arguments)]
    fn report_fight(
        &mut self,
        uin: Uin,
        opponent: Uin,
        loser: Uin,
        direction: Direction,
        reset_self: bool,
        reset_opponent: bool,
        level: Level,
        opponent_level: Level,
    ) -> Result<Response, EngineError> {
        self.stats.report_fight_calls += 1;

        if !self.combatants.contains_key(&uin) || !self.combatants.contains_key(&opponent) {
            return Ok(Response::ReportFight {
                uin,
                code: Code::InvalidOpponent,
                battle_field: self.battle_field_snapshot(None),
            });
        }
        if loser != uin && loser != opponent {
            return Ok(Response::ReportFight {
                uin,
                code: Code::InvalidOpponent,
                battle_field: self.battle_field_snapshot(Some(self.combatants[&uin].current_pos())),
            });
        }

        let (seeker_expected_neighbor, in_bounds) = self.combatants[&uin].current_pos().apply(direction);
        if !in_bounds || self.combatants[&opponent].current_pos() != seeker_expected_neighbor {
            return Ok(Response::ReportFight {
                uin,
                code: Code::OpponentMoved,
                battle_field: self.battle_field_snapshot(Some(self.combatants[&uin].current_pos())),
            });
        }

        self.combatants.get_mut(&uin).expect("checked above").clear_opponents(direction);
        self.persist_opponents(uin)?;

        if reset_self {
            self.teleport_to_born_position(uin, level)?;
        }
        if reset_opponent {
            self.teleport_to_born_position(opponent, opponent_level)?;
        }

        let now = self.now();
        self.apply_defeat(loser, now)?;

        Ok(Response::ReportFight {
            uin,
            code: Code::Ok,
            battle_field: self.battle_field_snapshot(Some(self.combatants[&uin].current_pos())),
        })
    }

    /// Records `uin`'s defeat at `when`, reordering its garrison entry so
    /// it sorts as most-recently-defeated.
    fn apply_defeat(&mut self, uin: Uin, when: TimeStamp) -> Result<(), EngineError> {
        let pos = self.combatants[&uin].current_pos();
        let handle = self.combatants[&uin].handle();
        let new_handle = self
            .fields
            .get_mut(&pos)
            .expect("loser stands on an existing field")
            .update_garrison_last_defeated_time(uin, when, handle);
        self.combatants.get_mut(&uin).expect("checked by caller").set_handle(new_handle);
        self.persist_combatant(uin)?;
        Ok(())
    }

    fn teleport_to_born_position(&mut self, uin: Uin, level: Level) -> Result<(), EngineError> {
        let sect = self.combatants[&uin].current_sect();
        let from = self.combatants[&uin].current_pos();
        let born_pos = self.sects[&sect].born_pos();
        if from != born_pos {
            self.perform_move(uin, from, born_pos, level, sect)?;
        }
        Ok(())
    }
}
