//! Random sampling for opponent selection.
//!
//! [`Field::get_opponents`](super::Field::get_opponents) needs "pick up to
//! `needs` uins from this eligible set, order unspecified, no duplicates".
//! A full [`rand::seq::SliceRandom::choose_multiple`] pass is more than
//! enough at this scale — fields rarely hold more than a handful of
//! eligible combatants per level band.

use rand::seq::IndexedRandom;

use super::Uin;

/// Samples up to `needs` distinct uins from `eligible` without replacement.
///
/// If `eligible.len() <= needs`, every entry is returned (order
/// unspecified). Uses the thread-local RNG; callers needing determinism
/// (tests, replay) should not rely on sampling order, only on set
/// membership — which is what every caller in this crate actually checks.
pub fn sample(eligible: &[Uin], needs: usize) -> Vec<Uin> {
    if eligible.len() <= needs {
        return eligible.to_vec();
    }
    let mut rng = rand::rng();
    eligible.choose_multiple(&mut rng, needs).copied().collect()
}
