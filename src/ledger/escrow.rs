//! Two-phase escrow rules
//!
//! Pure functions computing the balance deltas for each lifecycle
//! transition. Stores apply the returned plans inside a single transaction;
//! nothing here touches storage.
//!
//! Amounts are cents-exact. Pot shares are floored to the cent and any
//! leftover cents go one at a time to winners ordered by submission time,
//! then user id, so the whole pot is always paid out.

use crate::domain::{BalanceDelta, Participation, Wager};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

pub const WASH_NOT_ENOUGH_GUESSES: &str = "fewer than two distinct guesses at close";
pub const WASH_NO_WINNERS: &str = "no entrant picked the winning choice";

const CENT: Decimal = dec!(0.01);

fn floor_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

fn normalized(guess: &str) -> String {
    guess.trim().to_lowercase()
}

/// Escrow applied to one entrant when the window closes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowLine {
    pub user_id: Uuid,
    pub escrow_amount: Decimal,
    pub escrow_contingent: Decimal,
    pub delta: BalanceDelta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosePlan {
    /// Move to pending with these escrow lines
    Escrow { pot: Decimal, lines: Vec<EscrowLine> },
    /// Wash immediately; nothing was debited so nothing moves
    Wash { reason: String, distinct_guesses: usize },
}

/// Settlement of one entrant at resolve or wash time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleLine {
    pub user_id: Uuid,
    /// Set for winners of a resolution
    pub payout: Option<Decimal>,
    pub delta: BalanceDelta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlePlan {
    Payout {
        choice: String,
        pot: Decimal,
        winners: Vec<Uuid>,
        lines: Vec<SettleLine>,
    },
    Wash {
        reason: String,
        lines: Vec<SettleLine>,
    },
}

impl SettlePlan {
    pub fn lines(&self) -> &[SettleLine] {
        match self {
            SettlePlan::Payout { lines, .. } | SettlePlan::Wash { lines, .. } => lines,
        }
    }
}

/// Distinct guesses among entrants
pub fn distinct_guesses(participations: &[Participation]) -> BTreeSet<String> {
    participations
        .iter()
        .filter(|p| p.is_entrant())
        .map(|p| normalized(&p.guess))
        .collect()
}

/// active -> pending
///
/// Requires at least two distinct guesses. Each entrant has the wager amount
/// moved out of `available` and their potential payout share added to
/// `contingent`.
pub fn plan_close(wager: &Wager, participations: &[Participation]) -> ClosePlan {
    let entrants: Vec<&Participation> = participations.iter().filter(|p| p.is_entrant()).collect();
    let distinct = distinct_guesses(participations);

    if distinct.len() < 2 {
        return ClosePlan::Wash {
            reason: WASH_NOT_ENOUGH_GUESSES.to_string(),
            distinct_guesses: distinct.len(),
        };
    }

    let mut backers: BTreeMap<String, u32> = BTreeMap::new();
    for p in &entrants {
        *backers.entry(normalized(&p.guess)).or_default() += 1;
    }

    let pot = wager.wager_amount * Decimal::from(entrants.len() as u64);
    let mut lines: Vec<EscrowLine> = entrants
        .iter()
        .map(|p| {
            let same_guess = backers.get(&normalized(&p.guess)).copied().unwrap_or(1).max(1);
            let contingent = floor_cents(pot / Decimal::from(same_guess));
            EscrowLine {
                user_id: p.user_id,
                escrow_amount: wager.wager_amount,
                escrow_contingent: contingent,
                delta: BalanceDelta {
                    user_id: p.user_id,
                    available: -wager.wager_amount,
                    net: Decimal::ZERO,
                    contingent,
                },
            }
        })
        .collect();
    lines.sort_by_key(|l| l.user_id);

    ClosePlan::Escrow { pot, lines }
}

/// pending -> resolved
///
/// Converts to a wash when no escrowed entrant picked `choice`.
pub fn plan_resolve(participations: &[Participation], choice: &str) -> SettlePlan {
    let escrowed: Vec<&Participation> = participations
        .iter()
        .filter(|p| p.is_entrant() && p.escrow_amount > Decimal::ZERO)
        .collect();

    let wanted = normalized(choice);
    let mut winners: Vec<&Participation> = escrowed
        .iter()
        .copied()
        .filter(|p| normalized(&p.guess) == wanted)
        .collect();

    if winners.is_empty() {
        return plan_wash(participations, WASH_NO_WINNERS);
    }

    winners.sort_by(|a, b| {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    let pot: Decimal = escrowed.iter().map(|p| p.escrow_amount).sum();
    let share = floor_cents(pot / Decimal::from(winners.len() as u64));
    let leftover = pot - share * Decimal::from(winners.len() as u64);
    let extra_cents = (leftover / CENT).trunc();

    let mut payouts: BTreeMap<Uuid, Decimal> = BTreeMap::new();
    for (i, w) in winners.iter().enumerate() {
        let bonus = if Decimal::from(i as u64) < extra_cents {
            CENT
        } else {
            Decimal::ZERO
        };
        payouts.insert(w.user_id, share + bonus);
    }

    let mut lines: Vec<SettleLine> = escrowed
        .iter()
        .map(|p| match payouts.get(&p.user_id) {
            Some(payout) => SettleLine {
                user_id: p.user_id,
                payout: Some(*payout),
                delta: BalanceDelta {
                    user_id: p.user_id,
                    available: *payout,
                    net: *payout - p.escrow_amount,
                    contingent: -p.escrow_contingent,
                },
            },
            None => SettleLine {
                user_id: p.user_id,
                payout: None,
                delta: BalanceDelta {
                    user_id: p.user_id,
                    available: Decimal::ZERO,
                    net: -p.escrow_amount,
                    contingent: -p.escrow_contingent,
                },
            },
        })
        .collect();
    lines.sort_by_key(|l| l.user_id);

    SettlePlan::Payout {
        choice: choice.trim().to_string(),
        pot,
        winners: winners.iter().map(|w| w.user_id).collect(),
        lines,
    }
}

/// pending -> washed: exact reversal of the close-time escrow
pub fn plan_wash(participations: &[Participation], reason: &str) -> SettlePlan {
    let mut lines: Vec<SettleLine> = participations
        .iter()
        .filter(|p| p.escrow_amount > Decimal::ZERO || p.escrow_contingent > Decimal::ZERO)
        .map(|p| SettleLine {
            user_id: p.user_id,
            payout: None,
            delta: BalanceDelta {
                user_id: p.user_id,
                available: p.escrow_amount,
                net: Decimal::ZERO,
                contingent: -p.escrow_contingent,
            },
        })
        .collect();
    lines.sort_by_key(|l| l.user_id);

    SettlePlan::Wash {
        reason: reason.to_string(),
        lines,
    }
}
