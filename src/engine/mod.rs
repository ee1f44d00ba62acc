//! The game-state engine.
//!
//! [`Engine`] owns every field, sect, and combatant on the battlefield, plus
//! the three memory-mapped maps ([`crate::persist::OrderedMap`]) that make
//! that state durable. It runs on a single thread with no internal
//! locking — every [`Engine::handle`] call borrows `&mut self` for its
//! whole duration, so handlers never observe a partial mutation from
//! another in-flight request. An embedder that needs concurrent transport
//! connections serializes requests onto this one engine itself (a channel,
//! an event loop, whatever fits); the engine does not do it for them.
//!
//! ## Startup
//!
//! [`Engine::open`] either creates a fresh trio of persistence maps (first
//! boot) or restores them from an existing data directory (crash/restart).
//! Either way it then rebuilds every runtime field, sect, and combatant
//! from what the maps say — the maps are the source of truth; the runtime
//! structures in [`crate::battlefield`] are a derived, queryable index over
//! them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::battlefield::{Combatant, CombatantLite, Field, OpponentLite, Sect, TimeStamp, Uin};
use crate::geometry::{FieldType, Pos, SectType, GRID_SIZE};
use crate::persist::{self, OrderedMap, PersistError};
use crate::season::SeasonConfig;

pub mod handlers;


const OWNER_MAP_FILE: &str = "owner_map.mmap";
const COMBATANT_MAP_FILE: &str = "combatant_map.mmap";
const OPPONENT_MAP_FILE: &str = "opponent_map.mmap";

const OWNER_MAP_REGION_BYTES: usize = 20 * 1024;
const COMBATANT_MAP_REGION_BYTES: usize = 120 * 1024 * 1024;
const OPPONENT_MAP_REGION_BYTES: usize = 200 * 1024 * 1024;

/// Errors surfaced by [`Engine::open`] and the handlers in
/// [`crate::engine::handlers`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// A persistence map failed to create, restore, or mutate.
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    /// A cross-structure invariant did not hold at startup.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Where the eight sects start, and how long a defeated combatant is
/// excluded from opponent sampling.
///
/// Passed to [`Engine::open`]; the same values must be supplied across
/// restarts or the persisted born-field ownership will no longer line up
/// with what a fresh boot would have chosen.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the three `*.mmap` persistence files.
    pub data_dir: PathBuf,

    /// Born position for each of the eight sects, in [`SectType::ALL`] order.
    pub born_positions: [Pos; 8],

    /// Milliseconds a defeated combatant is excluded from opponent sampling.
    pub protection_window_ms: TimeStamp,

    /// Seed for the opponent-sampling RNG and the join-time sect
    /// assignment. `None` seeds from OS entropy; tests pass `Some(seed)`
    /// for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    /// The default born-position layout: the four grid corners plus the
    /// four edge midpoints, in [`SectType::ALL`] order.
    fn default() -> Self {
        let last = GRID_SIZE - 1;
        let mid = GRID_SIZE / 2;
        Self {
            data_dir: PathBuf::from("data"),
            born_positions: [
                Pos::new(0, 0),       // Shaolin
                Pos::new(last, 0),    // WuDang
                Pos::new(0, last),    // KunLun
                Pos::new(last, last), // EMei
                Pos::new(mid, 0),     // HuaShan
                Pos::new(mid, last),  // KongTong
                Pos::new(0, mid),     // MingJiao
                Pos::new(last, mid),  // GaiBang
            ],
            protection_window_ms: 30_000,
            rng_seed: None,
        }
    }
}

/// Tallies how many times each handler has been called and what it
/// returned, for the admin `/status` view.
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    pub join_calls: u64,
    pub query_battle_field_calls: u64,
    pub move_calls: u64,
    pub change_sect_calls: u64,
    pub change_opponent_calls: u64,
    pub check_fight_calls: u64,
    pub report_fight_calls: u64,
    pub rejected_calls: u64,
    pub last_season_reset_time: TimeStamp,
}

/// The engine's full, single-threaded state.
pub struct Engine {
    pub(crate) config: EngineConfig,

    pub(crate) owner_map: OrderedMap<Pos, SectType>,
    pub(crate) combatant_map: OrderedMap<Uin, CombatantLite>,
    pub(crate) opponent_map: OrderedMap<Uin, OpponentLite>,

    pub(crate) fields: HashMap<Pos, Field>,
    pub(crate) sects: HashMap<SectType, Sect>,
    pub(crate) combatants: HashMap<Uin, Combatant>,

    pub(crate) rng: StdRng,
    pub(crate) stats: EngineStats,

    /// Overrides [`Engine::now`] for deterministic tests. `None` in
    /// production, where `now()` reads the system clock.
    manual_time: Option<TimeStamp>,
}

impl Engine {
    /// Opens (or creates) an engine rooted at `config.data_dir`.
    ///
    /// On a fresh directory the three persistence maps are created and the
    /// battlefield is seeded from `config.born_positions`. On an existing
    /// directory the maps are restored and every field, sect, and
    /// combatant is rebuilt from their contents.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        std::fs::create_dir_all(&config.data_dir).map_err(PersistError::Io)?;

        // 1. Open (or create) the three persistence maps. combatant_map's
        //    capacity is clamped to opponent_map's physical capacity so the
        //    boot invariant below always holds, even on a brand-new
        //    directory where nothing has been written yet.
        let owner_map = open_owner_map(&config.data_dir.join(OWNER_MAP_FILE))?;
        let opponent_capacity = physical_capacity::<Uin, OpponentLite>(OPPONENT_MAP_REGION_BYTES)?;
        let combatant_capacity =
            physical_capacity::<Uin, CombatantLite>(COMBATANT_MAP_REGION_BYTES)?.min(opponent_capacity);
        let combatant_map = open_sized_map::<Uin, CombatantLite>(
            &config.data_dir.join(COMBATANT_MAP_FILE),
            COMBATANT_MAP_REGION_BYTES,
            combatant_capacity,
        )?;
        let opponent_map = open_sized_map::<Uin, OpponentLite>(
            &config.data_dir.join(OPPONENT_MAP_FILE),
            OPPONENT_MAP_REGION_BYTES,
            opponent_capacity,
        )?;

        if opponent_map.max_size() < combatant_map.max_size() {
            return Err(EngineError::Invariant(format!(
                "opponent_map capacity {} is smaller than combatant_map capacity {}",
                opponent_map.max_size(),
                combatant_map.max_size()
            )));
        }

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let mut engine = Self {
            config,
            owner_map,
            combatant_map,
            opponent_map,
            fields: HashMap::with_capacity(100),
            sects: HashMap::with_capacity(8),
            combatants: HashMap::new(),
            rng,
            stats: EngineStats::default(),
            manual_time: None,
        };

        engine.seed_fields_and_sects()?;
        engine.rebuild_combatants()?;

        tracing::info!(
            combatants = engine.combatants.len(),
            sects = engine.sects.len(),
            fields = engine.fields.len(),
            "engine opened"
        );

        Ok(engine)
    }

    /// Flushes every persistence map. Memory-mapped writes are already
    /// durable as of each mutating call; this exists so callers have an
    /// explicit "I am done, it is safe to stop" checkpoint.
    pub fn close(self) -> Result<(), EngineError> {
        tracing::info!("engine closing");
        Ok(())
    }

    /// Current time, honouring a test-installed override.
    pub(crate) fn now(&self) -> TimeStamp {
        self.manual_time.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as TimeStamp)
                .unwrap_or(0)
        })
    }

    /// Freezes the clock at `millis` for deterministic tests.
    #[cfg(test)]
    pub(crate) fn set_manual_time(&mut self, millis: TimeStamp) {
        self.manual_time = Some(millis);
    }

    /// The cutoff a [`crate::battlefield::Field::get_opponents`] call uses:
    /// anyone defeated more recently than this is still protected.
    pub(crate) fn last_time_not_in_protection(&self) -> TimeStamp {
        self.now() - self.config.protection_window_ms
    }

    fn seed_fields_and_sects(&mut self) -> Result<(), EngineError> {
        let fresh = self.owner_map.is_empty();

        for (sect, &born_pos) in SectType::ALL.iter().zip(self.config.born_positions.iter()) {
            self.sects.insert(*sect, Sect::new(*sect, born_pos));
            if fresh {
                self.owner_map.insert(born_pos, *sect)?;
            }
        }

        for y in 0..GRID_SIZE {
            for x in 0..GRID_SIZE {
                let pos = Pos::new(x, y);
                let owner = self.owner_map.get(&pos).unwrap_or(SectType::None);
                let kind = if self
                    .config
                    .born_positions
                    .iter()
                    .any(|&born| born == pos)
                {
                    FieldType::BornField
                } else {
                    FieldType::Default
                };
                self.fields.insert(pos, Field::new(owner, kind));
            }
        }

        Ok(())
    }

    fn rebuild_combatants(&mut self) -> Result<(), EngineError> {
        let entries: Vec<(Uin, CombatantLite)> =
            self.combatant_map.iter().map(|(k, v)| (*k, *v)).collect();

        for (uin, lite) in entries {
            let owner = self
                .fields
                .get(&lite.pos)
                .map(|f| f.owner())
                .unwrap_or(SectType::None);
            if owner == SectType::None {
                return Err(EngineError::Invariant(format!(
                    "combatant {uin} occupies {:?} but its field has no owner",
                    lite.pos
                )));
            }

            let field = self.fields.get_mut(&lite.pos).expect("field exists for every grid position");
            let handle = field.add_garrison(uin, lite.level, lite.last_defeated_time);

            let mut combatant = Combatant::new(owner, lite.pos, handle);
            if let Some(opponent_lite) = self.opponent_map.get(&uin) {
                combatant.set_opponent_lite(opponent_lite);
            }
            self.combatants.insert(uin, combatant);
            self.sects.get_mut(&owner).expect("every SectType::ALL member is seeded").add_member(uin);
        }

        Ok(())
    }

    /// Picks a uniformly random joinable sect (excludes [`SectType::None`]).
    pub(crate) fn random_sect(&mut self) -> SectType {
        let idx = self.rng.random_range(0..SectType::ALL.len());
        SectType::ALL[idx]
    }

    /// Writes `uin`'s current position, level, and `last_defeated_time`
    /// into `combatant_map`. `uin` must be a live runtime combatant.
    pub(crate) fn persist_combatant(&mut self, uin: Uin) -> Result<(), EngineError> {
        let combatant = &self.combatants[&uin];
        let lite = CombatantLite {
            pos: combatant.current_pos(),
            level: combatant.level(),
            last_defeated_time: combatant.handle().last_defeated_time,
        };
        self.combatant_map.insert(uin, lite)?;
        Ok(())
    }

    /// Writes `uin`'s cached opponent lists into `opponent_map`. `uin`
    /// must be a live runtime combatant.
    pub(crate) fn persist_opponents(&mut self, uin: Uin) -> Result<(), EngineError> {
        let lite = self.combatants[&uin].opponent_lite();
        self.opponent_map.insert(uin, lite)?;
        Ok(())
    }

    pub(crate) fn persist_owner(&mut self, pos: Pos, sect: SectType) -> Result<(), EngineError> {
        self.owner_map.insert(pos, sect)?;
        Ok(())
    }

    /// Resets every field and sect to its freshly-seeded state and removes
    /// every combatant, for the seasonal battlefield reset.
    ///
    /// The three persistence maps are cleared first so a crash mid-reset
    /// never leaves stale entries referencing a field that no longer has
    /// that owner.
    pub fn reset_battle_field(&mut self) -> Result<(), EngineError> {
        self.combatant_map.clear()?;
        self.opponent_map.clear()?;
        self.owner_map.clear()?;

        self.fields.clear();
        self.sects.clear();
        self.combatants.clear();

        self.seed_fields_and_sects()?;
        self.stats.last_season_reset_time = self.now();

        tracing::info!(at = self.stats.last_season_reset_time, "battlefield reset");
        Ok(())
    }

    /// Seeds the season clock from a restored
    /// [`crate::backup::metadata::BackupMetadata::latest_battlefield_reset_time`].
    /// `Engine::open` has no way to know this value on its own since it
    /// isn't stored in any of the three persistence maps; an embedder
    /// calls this once, right after recovery and before the first
    /// [`Engine::check_season`], so a freshly restarted server doesn't
    /// mistake "never told what season it is" for "season just rolled
    /// over".
    pub fn set_last_season_reset_time(&mut self, time: TimeStamp) {
        self.stats.last_season_reset_time = time;
    }

    /// Compares the current season to the one `last_season_reset_time`
    /// fell in under `config`, running [`Engine::reset_battle_field`] and
    /// returning `true` if they differ. An embedder calls this once per
    /// tick (the original polled every second); it is a no-op call, not a
    /// background task, so nothing fires unless something drives the clock.
    pub fn check_season(&mut self, config: &SeasonConfig) -> Result<bool, EngineError> {
        let now = self.now();
        if !config.should_reset(self.stats.last_season_reset_time, now) {
            return Ok(false);
        }
        self.reset_battle_field()?;
        Ok(true)
    }

    /// Forcibly removes `uin` from the battlefield: drops its garrison
    /// entry, its sect membership, and both persistence-map rows. Used by
    /// [`crate::admin::AdminView::remove_combatant`]; no handler in
    /// [`crate::engine::handlers`] calls this on its own.
    pub fn remove_combatant(&mut self, uin: Uin) -> Result<bool, EngineError> {
        let Some(combatant) = self.combatants.remove(&uin) else {
            return Ok(false);
        };

        let pos = combatant.current_pos();
        let handle = combatant.handle();
        self.fields.get_mut(&pos).expect("combatant's field exists").reduce_garrison(uin, handle);
        self.sects
            .get_mut(&combatant.current_sect())
            .expect("sect exists")
            .remove_member(uin);

        self.combatant_map.remove(&uin)?;
        self.opponent_map.remove(&uin)?;

        tracing::info!(uin, "combatant removed by admin");
        Ok(true)
    }
}

fn open_owner_map(path: &Path) -> Result<OrderedMap<Pos, SectType>, EngineError> {
    let capacity = physical_capacity::<Pos, SectType>(OWNER_MAP_REGION_BYTES)?;
    open_sized_map(path, OWNER_MAP_REGION_BYTES, capacity)
}

fn open_sized_map<K, V>(
    path: &Path,
    region_bytes: usize,
    capacity: usize,
) -> Result<OrderedMap<K, V>, EngineError>
where
    K: crate::encoding::Encode + crate::encoding::Decode + Ord + Clone + Default,
    V: crate::encoding::Encode + crate::encoding::Decode + Clone + Default,
{
    if path.exists() {
        Ok(OrderedMap::restore(path)?)
    } else {
        let key_size = persist::fixed_encoded_size(&K::default()).map_err(PersistError::from)?;
        let value_size = persist::fixed_encoded_size(&V::default()).map_err(PersistError::from)?;
        Ok(OrderedMap::create(path, region_bytes, key_size, value_size, capacity)?)
    }
}

fn physical_capacity<K, V>(region_bytes: usize) -> Result<usize, EngineError>
where
    K: crate::encoding::Encode + Default,
    V: crate::encoding::Encode + Default,
{
    let key_size = persist::fixed_encoded_size(&K::default()).map_err(PersistError::from)?;
    let value_size = persist::fixed_encoded_size(&V::default()).map_err(PersistError::from)?;
    let slot_size = persist::SLOT_OVERHEAD_BYTES + key_size + value_size;
    Ok((region_bytes - persist::HEADER_BYTES) / slot_size)
}
