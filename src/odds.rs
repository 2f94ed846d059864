//! Pari-mutuel odds.
//!
//! The winning pool buys back its own stake plus a pro-rata share of the
//! losing pool, so a side's multiplier is `1 + opposite / own`.

use crate::state::Points;

/// Payout multiplier for a side holding `own_pool` against `opposite_pool`.
///
/// An empty pool has nobody to pay, so its multiplier is only ever displayed;
/// it is pinned to 1.
pub fn multiplier(own_pool: Points, opposite_pool: Points) -> f64 {
    if own_pool == 0 {
        return 1.0;
    }
    1.0 + opposite_pool as f64 / own_pool as f64
}

/// Points returned to a winner who staked `stake` at `multiplier`.
///
/// Each bettor rounds independently (half to even), so the payouts may differ
/// from the combined pool by a few points.
pub fn payout(stake: Points, multiplier: f64) -> Points {
    (stake as f64 * multiplier).round_ties_even() as Points
}

/// Multiplier as shown to users, to two decimal places and always with a
/// decimal point (`4.0`, `1.33`).
pub fn display(multiplier: f64) -> String {
    let rounded = (multiplier * 100.0).round() / 100.0;
    format!("{rounded:?}")
}

/// Multiplier shown on a pool's board. A pool nobody has bet on shows a bare `1`.
pub fn display_for(own_pool: Points, opposite_pool: Points) -> String {
    if own_pool == 0 {
        return "1".to_string();
    }
    display(multiplier(own_pool, opposite_pool))
}
