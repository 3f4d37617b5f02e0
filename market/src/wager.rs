//! Wager admission
//!
//! One unit of work per submission: validate the bet, check the balance
//! under a row lock, move the stake into the bet's escrow and record the
//! wager under its idempotency key. A key seen before short-circuits to the
//! wager recorded first, so a retried submission moves funds at most once.

use crate::{
    bets,
    error::{Error, Result},
    tables::{keys, VOTES, WAGERS, WAGER_KEYS},
    types::{Admission, Bet, OptionId, Wager, WagerId, WagerReceipt},
};
use chrono::{DateTime, Utc};
use wagerbook_ledger::{
    accounts, Amount, BetId, Error as LedgerError, Posting, ReadTables, Reason, TransactionRequest,
    UnitOfWork, UserId,
};

/// Longest accepted idempotency key, in bytes
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Check a submission before any store access; returns the trimmed key
pub(crate) fn validate_submission(amount: Amount, idempotency_key: &str) -> Result<String> {
    if amount <= 0 {
        return Err(Error::Validation("amount must be positive".to_string()));
    }
    let key = idempotency_key.trim();
    if key.is_empty() {
        return Err(Error::Validation("idempotency key is required".to_string()));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(Error::Validation(format!(
            "idempotency key exceeds {} bytes",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    Ok(key.to_string())
}

/// Wager recorded under `(user, idempotency_key)`, if any
pub fn wager_by_key<R: ReadTables>(reader: &R, user: &UserId, idempotency_key: &str) -> Result<Option<Wager>> {
    Ok(reader.get(WAGER_KEYS, &keys::wager_key(user, idempotency_key))?)
}

/// Whether any resolution vote exists for the bet
pub(crate) fn voting_started<R: ReadTables>(reader: &R, bet: &BetId) -> Result<bool> {
    Ok(reader.any_with_prefix(VOTES, bet.as_bytes())?)
}

/// Admit a stake. Returns the receipt and the bet it was placed on.
///
/// A collision on the idempotency index after funds moved fails with
/// [`Error::DuplicateSubmission`], which rolls the movement back.
pub(crate) fn place_wager(
    uow: &mut UnitOfWork<'_>,
    user: UserId,
    bet_id: BetId,
    option_id: OptionId,
    amount: Amount,
    idempotency_key: &str,
    now: DateTime<Utc>,
) -> Result<(WagerReceipt, Bet)> {
    if let Some(prior) = wager_by_key(&*uow, &user, idempotency_key)? {
        let bet = bets::require_bet(&*uow, &prior.bet_id)?;
        tracing::debug!(
            user_id = %user,
            bet_id = %prior.bet_id,
            wager_id = %prior.id,
            "Wager already applied"
        );
        return Ok((
            WagerReceipt {
                wager: prior,
                admission: Admission::AlreadyApplied,
            },
            bet,
        ));
    }

    // 1. The bet accepts stakes on this option
    let bet = bets::lock_bet(uow, &bet_id)?;
    if bet.option(&option_id).is_none() {
        return Err(Error::NotFound(format!(
            "option {} on bet {}",
            option_id, bet_id
        )));
    }
    if !bet.is_open() {
        return Err(Error::Conflict("bet is closed".to_string()));
    }
    if !bet.before_deadline(now) {
        return Err(Error::Conflict("staking period is over".to_string()));
    }
    if voting_started(&*uow, &bet_id)? {
        return Err(Error::Conflict(
            "bet is awaiting resolution".to_string(),
        ));
    }

    // 2. Authoritative balance, locked until commit
    let wallet = accounts::default_wallet(&*uow, &user)?
        .ok_or_else(|| Error::NotFound(format!("wallet of user {}", user)))?;
    let balance = uow.lock_balance(&wallet.id)?;
    if amount > balance {
        return Err(LedgerError::InsufficientFunds {
            account: wallet.id,
            balance,
            requested: amount,
        }
        .into());
    }

    // 3. Escrow, created on the first stake
    let escrow = uow.ensure_escrow(bet_id)?;

    // 4. Stake moves wallet -> escrow
    let tx_id = uow.record_transaction(
        &TransactionRequest::new(
            Reason::Bet,
            vec![Posting::debit(wallet.id, amount), Posting::credit(escrow.id, amount)],
        )
        .with_bet(bet_id),
    )?;

    // 5. Wager row under its idempotency key
    let wager = Wager {
        id: WagerId::new(),
        bet_id,
        user_id: user,
        option_id,
        amount,
        idempotency_key: idempotency_key.to_string(),
        tx_id,
        created_at: now,
    };
    if let Some(existing) =
        uow.insert_if_absent(WAGER_KEYS, &keys::wager_key(&user, idempotency_key), &wager)?
    {
        return Err(Error::DuplicateSubmission(Box::new(existing)));
    }
    uow.put(WAGERS, &keys::wager(&bet_id, &wager.id), &wager)?;

    tracing::info!(
        user_id = %user,
        bet_id = %bet_id,
        wager_id = %wager.id,
        tx_id = %tx_id,
        amount,
        "Wager placed"
    );

    Ok((
        WagerReceipt {
            wager,
            admission: Admission::Placed,
        },
        bet,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_validation() {
        assert_eq!(validate_submission(5, "  k-1 ").unwrap(), "k-1");
        assert!(matches!(validate_submission(0, "k"), Err(Error::Validation(_))));
        assert!(matches!(validate_submission(-3, "k"), Err(Error::Validation(_))));
        assert!(matches!(validate_submission(5, "   "), Err(Error::Validation(_))));
        assert!(validate_submission(5, &"k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1)).is_err());
    }
}
