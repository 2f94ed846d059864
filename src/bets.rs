use std::collections::BTreeMap;

use crate::state::{Credit, Points, Side, UserId};

/// Pool sums and bettor counts for both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolTotals {
    pub sum_a: Points,
    pub sum_b: Points,
    pub count_a: usize,
    pub count_b: usize,
}

impl PoolTotals {
    pub fn sum(&self, side: Side) -> Points {
        match side {
            Side::A => self.sum_a,
            Side::B => self.sum_b,
        }
    }

    pub fn count(&self, side: Side) -> usize {
        match side {
            Side::A => self.count_a,
            Side::B => self.count_b,
        }
    }

    /// Either side has no bettors.
    pub fn is_one_sided(&self) -> bool {
        self.count_a == 0 || self.count_b == 0
    }
}

/// In-memory positions of one market: cumulative stake per user, per side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BetLedger {
    option_a: BTreeMap<UserId, Points>,
    option_b: BTreeMap<UserId, Points>,
}

impl BetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self, side: Side) -> &BTreeMap<UserId, Points> {
        match side {
            Side::A => &self.option_a,
            Side::B => &self.option_b,
        }
    }

    fn pool_mut(&mut self, side: Side) -> &mut BTreeMap<UserId, Points> {
        match side {
            Side::A => &mut self.option_a,
            Side::B => &mut self.option_b,
        }
    }

    /// The side `user_id` has a position on, if any.
    pub fn position(&self, user_id: UserId) -> Option<Side> {
        if self.option_a.contains_key(&user_id) {
            Some(Side::A)
        } else if self.option_b.contains_key(&user_id) {
            Some(Side::B)
        } else {
            None
        }
    }

    /// Add `points` to the user's stake on `side`.
    ///
    /// Returns `(previous, previous + points)`. Side exclusivity is checked by
    /// the caller before any money moves.
    pub fn merge(&mut self, user_id: UserId, side: Side, points: Points) -> (Points, Points) {
        let stake = self.pool_mut(side).entry(user_id).or_insert(0);
        let previous = *stake;
        *stake = previous.saturating_add(points);
        (previous, *stake)
    }

    pub fn stake(&self, user_id: UserId, side: Side) -> Points {
        self.pool(side).get(&user_id).copied().unwrap_or(0)
    }

    pub fn totals(&self) -> PoolTotals {
        PoolTotals {
            sum_a: self.option_a.values().sum(),
            sum_b: self.option_b.values().sum(),
            count_a: self.option_a.len(),
            count_b: self.option_b.len(),
        }
    }

    pub fn stakes(&self, side: Side) -> impl Iterator<Item = (UserId, Points)> + '_ {
        self.pool(side).iter().map(|(user, points)| (*user, *points))
    }

    /// Every stake on both sides, as refund credits.
    pub fn refunds(&self) -> Vec<Credit> {
        self.stakes(Side::A)
            .chain(self.stakes(Side::B))
            .map(|(user, points)| Credit::new(user, points))
            .collect()
    }
}
