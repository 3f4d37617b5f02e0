//! Payout distribution
//!
//! Splits a closed bet's escrow among the users who backed the winning
//! option, proportionally to their summed stake:
//!
//! ```text
//!   escrow_total = 100, winners A:40 B:60  (ordered B, A)
//!
//!   B: floor(100 * 60 / 100) = 60
//!   A: 100 - 60              = 40   (last winner takes the remainder)
//! ```
//!
//! Shares are computed in `i128` so `escrow_total * stake` cannot overflow,
//! and the last winner absorbs the truncation so the shares always add up to
//! exactly `escrow_total`. With no winning stake the whole pot goes to the
//! house. Either way the movement is a single ledger transaction.

use crate::{
    error::Result,
    tables::WAGERS,
    types::{Bet, OptionId, Payout, Settlement, Wager},
    users,
};
use std::collections::BTreeMap;
use wagerbook_ledger::{
    accounts, journal, Amount, Error as LedgerError, Posting, ReadTables, Reason,
    TransactionRequest, UnitOfWork, UserId,
};

/// Note on a payout transaction
pub const PAYOUT_NOTE: &str = "payout";

/// Note on a house sweep transaction
pub const HOUSE_SWEEP_NOTE: &str = "no winners, to house";

/// Split `escrow_total` among winning stakes.
///
/// `stakes` holds one `(user, amount)` per winning wager; a user's wagers are
/// summed first. Winners are ordered by summed stake descending, ties broken
/// by user id ascending. Returns an empty list when nobody backed the winner.
pub fn split_payout(escrow_total: Amount, stakes: &[(UserId, Amount)]) -> Vec<Payout> {
    let mut by_user: BTreeMap<UserId, i128> = BTreeMap::new();
    for (user, amount) in stakes {
        *by_user.entry(*user).or_insert(0) += *amount as i128;
    }

    let mut winners: Vec<(UserId, i128)> = by_user.into_iter().filter(|(_, s)| *s > 0).collect();
    winners.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let win_total: i128 = winners.iter().map(|(_, s)| s).sum();
    if win_total == 0 {
        return Vec::new();
    }

    let escrow = escrow_total as i128;
    let last = winners.len() - 1;
    let mut distributed: i128 = 0;
    winners
        .into_iter()
        .enumerate()
        .map(|(i, (user_id, stake))| {
            let share = if i == last {
                escrow - distributed
            } else {
                escrow * stake / win_total
            };
            distributed += share;
            Payout {
                user_id,
                stake: stake as Amount,
                share: share as Amount,
            }
        })
        .collect()
}

/// Every wager on a bet, oldest first
pub fn wagers_for_bet<R: ReadTables>(reader: &R, bet: &Bet) -> Result<Vec<Wager>> {
    Ok(reader
        .scan_prefix::<Wager>(WAGERS, bet.id.as_bytes())?
        .into_iter()
        .map(|(_, wager)| wager)
        .collect())
}

/// Move a closing bet's escrow to the winners, or to the house.
///
/// Runs inside the unit of work that closes the bet, so a failure here rolls
/// the close back too.
pub(crate) fn distribute(
    uow: &mut UnitOfWork<'_>,
    bet: &Bet,
    winning_option: OptionId,
) -> Result<Settlement> {
    let wagers = wagers_for_bet(&*uow, bet)?;
    let escrow_total = wagers
        .iter()
        .try_fold(0 as Amount, |acc, w| acc.checked_add(w.amount))
        .ok_or_else(|| LedgerError::IntegrityViolation(format!("escrow of bet {} overflows", bet.id)))?;

    let mut settlement = Settlement {
        bet_id: bet.id,
        winning_option,
        escrow_total,
        payouts: Vec::new(),
        house_sweep: 0,
        tx_id: None,
    };
    if escrow_total == 0 {
        return Ok(settlement);
    }

    let escrow = accounts::escrow(&*uow, &bet.id)?.ok_or_else(|| {
        LedgerError::IntegrityViolation(format!("bet {} has stakes but no escrow account", bet.id))
    })?;
    let held = journal::balance(&*uow, &escrow.id)?;
    if held != escrow_total {
        return Err(LedgerError::IntegrityViolation(format!(
            "escrow of bet {} holds {} but wagers sum to {}",
            bet.id, held, escrow_total
        ))
        .into());
    }

    let stakes: Vec<(UserId, Amount)> = wagers
        .iter()
        .filter(|w| w.option_id == winning_option)
        .map(|w| (w.user_id, w.amount))
        .collect();
    let payouts = split_payout(escrow_total, &stakes);

    let request = if payouts.is_empty() {
        let house = users::ensure_house(uow)?;
        settlement.house_sweep = escrow_total;
        TransactionRequest::new(
            Reason::Bet,
            vec![
                Posting::debit(escrow.id, escrow_total),
                Posting::credit(house.id, escrow_total),
            ],
        )
        .with_note(HOUSE_SWEEP_NOTE)
        .with_bet(bet.id)
    } else {
        let mut postings = vec![Posting::debit(escrow.id, escrow_total)];
        for payout in payouts.iter().filter(|p| p.share > 0) {
            let wallet = accounts::default_wallet(&*uow, &payout.user_id)?.ok_or_else(|| {
                LedgerError::IntegrityViolation(format!(
                    "winner {} has no wallet",
                    payout.user_id
                ))
            })?;
            postings.push(Posting::credit(wallet.id, payout.share));
        }
        settlement.payouts = payouts;
        TransactionRequest::new(Reason::Bet, postings)
            .with_note(PAYOUT_NOTE)
            .with_bet(bet.id)
    };

    settlement.tx_id = Some(uow.record_transaction(&request)?);

    tracing::info!(
        bet_id = %bet.id,
        option_id = %winning_option,
        amount = escrow_total,
        winners = settlement.payouts.len(),
        house_sweep = settlement.house_sweep,
        "Escrow distributed"
    );

    Ok(settlement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use wagerbook_ledger::uuid::Uuid;

    fn user(n: u128) -> UserId {
        UserId::from_uuid(Uuid::from_u128(n))
    }

    #[test]
    fn test_exact_proportions() {
        let (a, b) = (user(1), user(2));
        let payouts = split_payout(100, &[(a, 40), (b, 60)]);

        assert_eq!(payouts.len(), 2);
        assert_eq!((payouts[0].user_id, payouts[0].share), (b, 60));
        assert_eq!((payouts[1].user_id, payouts[1].share), (a, 40));
    }

    #[test]
    fn test_losers_fund_winners() {
        // 30 on the winner, 70 on losing options
        let (a, b) = (user(1), user(2));
        let payouts = split_payout(100, &[(a, 10), (b, 20)]);

        assert_eq!(payouts[0].user_id, b);
        assert_eq!(payouts[0].share, 66);
        assert_eq!(payouts[1].share, 34);
    }

    #[test]
    fn test_wagers_summed_per_user() {
        let (a, b) = (user(1), user(2));
        let payouts = split_payout(90, &[(a, 10), (b, 20), (a, 15)]);

        assert_eq!(payouts.len(), 2);
        assert_eq!((payouts[0].user_id, payouts[0].stake), (a, 25));
        assert_eq!(payouts.iter().map(|p| p.share).sum::<Amount>(), 90);
    }

    #[test]
    fn test_ties_ordered_by_user_id() {
        let (a, b, c) = (user(1), user(2), user(3));
        let payouts = split_payout(10, &[(c, 1), (a, 1), (b, 1)]);

        let order: Vec<UserId> = payouts.iter().map(|p| p.user_id).collect();
        assert_eq!(order, vec![a, b, c]);
        assert_eq!(payouts[0].share, 3);
        assert_eq!(payouts[1].share, 3);
        assert_eq!(payouts[2].share, 4);
    }

    #[test]
    fn test_no_winning_stake() {
        assert!(split_payout(50, &[]).is_empty());
    }

    #[test]
    fn test_large_amounts_do_not_overflow() {
        let (a, b) = (user(1), user(2));
        let total = i64::MAX - 1;
        let payouts = split_payout(total, &[(a, total / 2), (b, total / 2)]);
        assert_eq!(payouts.iter().map(|p| p.share as i128).sum::<i128>(), total as i128);
    }

    proptest! {
        /// Shares always add up to the pot and never undercut a stake
        #[test]
        fn prop_payout_conserves_escrow(
            stakes in prop::collection::vec((1u128..8, 1i64..10_000), 1..20),
            losing in 0i64..100_000,
        ) {
            let stakes: Vec<(UserId, Amount)> =
                stakes.into_iter().map(|(u, a)| (user(u), a)).collect();
            let escrow_total = stakes.iter().map(|(_, a)| a).sum::<Amount>() + losing;

            let payouts = split_payout(escrow_total, &stakes);
            prop_assert_eq!(payouts.iter().map(|p| p.share).sum::<Amount>(), escrow_total);
            for payout in &payouts {
                prop_assert!(payout.share >= payout.stake);
            }
            for pair in payouts.windows(2) {
                prop_assert!(pair[0].stake >= pair[1].stake);
            }
        }
    }
}
