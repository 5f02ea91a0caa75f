use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-table, per-member holdings
///
/// `available` is spendable, `contingent` is the potential payout held in
/// escrow for pending wagers, `net` is cumulative realized profit or loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberBalance {
    pub table_id: Uuid,
    pub user_id: Uuid,
    pub available: Decimal,
    pub net: Decimal,
    pub contingent: Decimal,
}

impl MemberBalance {
    pub fn empty(table_id: Uuid, user_id: Uuid) -> Self {
        Self {
            table_id,
            user_id,
            available: Decimal::ZERO,
            net: Decimal::ZERO,
            contingent: Decimal::ZERO,
        }
    }

    pub fn with_available(table_id: Uuid, user_id: Uuid, available: Decimal) -> Self {
        Self {
            available,
            ..Self::empty(table_id, user_id)
        }
    }

    /// Returns the balance after applying `delta`
    pub fn applied(&self, delta: &BalanceDelta) -> Self {
        Self {
            available: self.available + delta.available,
            net: self.net + delta.net,
            contingent: self.contingent + delta.contingent,
            ..*self
        }
    }
}

/// Signed change to one member's balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub user_id: Uuid,
    pub available: Decimal,
    pub net: Decimal,
    pub contingent: Decimal,
}

impl BalanceDelta {
    pub fn zero(user_id: Uuid) -> Self {
        Self {
            user_id,
            available: Decimal::ZERO,
            net: Decimal::ZERO,
            contingent: Decimal::ZERO,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.available.is_zero() && self.net.is_zero() && self.contingent.is_zero()
    }
}

/// Before/after pair recorded in the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceMovement {
    pub user_id: Uuid,
    pub before: MemberBalance,
    pub after: MemberBalance,
}
