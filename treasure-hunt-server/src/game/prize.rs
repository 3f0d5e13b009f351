//! Prize Distribution
//!
//! The winner receives `floor(pool * WINNER_SHARE_PERCENT / 100)`. The
//! remainder stays in the pool and rolls into the next round.

use crate::game::ledger::{Amount, Ledger, TransferError};
use crate::game::state::Identity;
use crate::WINNER_SHARE_PERCENT;

/// Winner's share of `pool`, rounded down.
///
/// Split into quotient and remainder so large pools cannot overflow.
#[inline]
pub fn winner_share(pool: Amount) -> Amount {
    let percent = Amount::from(WINNER_SHARE_PERCENT);
    (pool / 100) * percent + (pool % 100) * percent / 100
}

/// Pay `winner` their share of the current pool. Returns the prize.
pub fn pay_winner(ledger: &mut dyn Ledger, winner: &Identity) -> Result<Amount, TransferError> {
    let prize = winner_share(ledger.pool_balance());
    ledger.transfer(winner, prize)?;
    Ok(prize)
}

/// Transfer the whole pool to `owner`. Returns the amount moved.
pub fn drain(ledger: &mut dyn Ledger, owner: &Identity) -> Result<Amount, TransferError> {
    let amount = ledger.pool_balance();
    ledger.transfer(owner, amount)?;
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ledger::InMemoryLedger;
    use proptest::prelude::*;

    #[test]
    fn test_winner_share_examples() {
        assert_eq!(winner_share(0), 0);
        assert_eq!(winner_share(1), 0);
        assert_eq!(winner_share(10), 9);
        assert_eq!(winner_share(15), 13);
        assert_eq!(winner_share(20_000_000_000_000_000), 18_000_000_000_000_000);
        assert_eq!(winner_share(Amount::MAX), Amount::MAX / 100 * 90 + (Amount::MAX % 100) * 90 / 100);
    }

    #[test]
    fn test_pay_winner_leaves_remainder() {
        let mut ledger = InMemoryLedger::with_pool(15);
        let winner = Identity::new([1; 16]);

        let prize = pay_winner(&mut ledger, &winner).unwrap();
        assert_eq!(prize, 13);
        assert_eq!(ledger.balance_of(&winner), 13);
        assert_eq!(ledger.pool_balance(), 2);
    }

    #[test]
    fn test_failed_payout_reports_error() {
        let mut ledger = InMemoryLedger::with_pool(100);
        let winner = Identity::new([1; 16]);
        ledger.reject_incoming(winner);

        assert_eq!(pay_winner(&mut ledger, &winner), Err(TransferError::Rejected(winner)));
        assert_eq!(ledger.pool_balance(), 100);
    }

    #[test]
    fn test_drain_empties_pool() {
        let mut ledger = InMemoryLedger::with_pool(77);
        let owner = Identity::new([9; 16]);

        assert_eq!(drain(&mut ledger, &owner).unwrap(), 77);
        assert_eq!(ledger.pool_balance(), 0);
        assert_eq!(ledger.balance_of(&owner), 77);
    }

    proptest! {
        #[test]
        fn prop_winner_share_matches_floor(pool in 0u128..(u128::MAX / 100)) {
            prop_assert_eq!(winner_share(pool), pool * 90 / 100);
            prop_assert!(winner_share(pool) <= pool);
        }
    }
}
