//! Administrative transfers: gift, airdrop and peer transfer

use crate::{
    error::{Error, Result},
    types::AirdropReceipt,
    users,
};
use wagerbook_ledger::{
    accounts, Amount, Error as LedgerError, Posting, Reason, TransactionId, TransactionRequest,
    UnitOfWork, UserId,
};

/// Trim a note and cap it at `max_chars` characters; blank notes are dropped
pub fn normalize_note(note: Option<&str>, max_chars: usize) -> Option<String> {
    let note = note?.trim();
    if note.is_empty() {
        return None;
    }
    Some(note.chars().take(max_chars).collect())
}

pub(crate) fn validate_amount(amount: Amount) -> Result<()> {
    if amount <= 0 {
        return Err(Error::Validation("amount must be positive".to_string()));
    }
    Ok(())
}

fn with_note(request: TransactionRequest, note: Option<&str>) -> TransactionRequest {
    match note {
        Some(note) => request.with_note(note),
        None => request,
    }
}

/// House pays `amount` into one user's wallet
pub(crate) fn gift(
    uow: &mut UnitOfWork<'_>,
    recipient: UserId,
    amount: Amount,
    note: Option<&str>,
) -> Result<TransactionId> {
    if recipient.is_house() {
        return Err(Error::Validation("the house cannot receive gifts".to_string()));
    }
    users::require_user(&*uow, &recipient)?;
    let house = users::ensure_house(uow)?;
    let wallet = uow.ensure_default_wallet(recipient)?;

    let tx_id = uow.record_transaction(&with_note(
        TransactionRequest::new(
            Reason::Gift,
            vec![Posting::debit(house.id, amount), Posting::credit(wallet.id, amount)],
        ),
        note,
    ))?;

    tracing::info!(user_id = %recipient, tx_id = %tx_id, amount, "Gift sent");
    Ok(tx_id)
}

/// House pays `amount` to every user currently registered
pub(crate) fn airdrop(uow: &mut UnitOfWork<'_>, amount: Amount, note: Option<&str>) -> Result<AirdropReceipt> {
    let recipients = users::members(&*uow)?;
    if recipients.is_empty() {
        return Err(Error::Validation("no recipients for the airdrop".to_string()));
    }
    let total = amount
        .checked_mul(recipients.len() as Amount)
        .ok_or_else(|| Error::Validation("airdrop total overflows".to_string()))?;

    let house = users::ensure_house(uow)?;
    let mut postings = Vec::with_capacity(recipients.len() + 1);
    postings.push(Posting::debit(house.id, total));
    for user in &recipients {
        let wallet = uow.ensure_default_wallet(user.id)?;
        postings.push(Posting::credit(wallet.id, amount));
    }

    let tx_id = uow.record_transaction(&with_note(
        TransactionRequest::new(Reason::Airdrop, postings),
        note,
    ))?;

    tracing::info!(tx_id = %tx_id, recipients = recipients.len(), amount, total, "Airdrop sent");
    Ok(AirdropReceipt {
        tx_id,
        recipients: recipients.len(),
        amount,
        total,
    })
}

/// Move `amount` between two users' wallets. The sender's balance is read
/// under a row lock.
pub(crate) fn transfer(
    uow: &mut UnitOfWork<'_>,
    sender: UserId,
    recipient: UserId,
    amount: Amount,
    note: Option<&str>,
) -> Result<TransactionId> {
    if sender == recipient {
        return Err(Error::Validation("cannot transfer to yourself".to_string()));
    }
    if recipient.is_house() {
        return Err(Error::Validation("cannot transfer to the house".to_string()));
    }
    users::require_user(&*uow, &recipient)?;

    let from = accounts::default_wallet(&*uow, &sender)?
        .ok_or_else(|| Error::NotFound(format!("wallet of user {}", sender)))?;
    let balance = uow.lock_balance(&from.id)?;
    if amount > balance {
        return Err(LedgerError::InsufficientFunds {
            account: from.id,
            balance,
            requested: amount,
        }
        .into());
    }
    let to = uow.ensure_default_wallet(recipient)?;

    let tx_id = uow.record_transaction(&with_note(
        TransactionRequest::new(
            Reason::Transfer,
            vec![Posting::debit(from.id, amount), Posting::credit(to.id, amount)],
        ),
        note,
    ))?;

    tracing::info!(
        user_id = %sender,
        recipient = %recipient,
        tx_id = %tx_id,
        amount,
        "Transfer sent"
    );
    Ok(tx_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notes_trimmed_and_capped() {
        assert_eq!(normalize_note(None, 200), None);
        assert_eq!(normalize_note(Some("   "), 200), None);
        assert_eq!(normalize_note(Some(" thanks! "), 200).as_deref(), Some("thanks!"));

        let long = "é".repeat(250);
        let capped = normalize_note(Some(&long), 200).unwrap();
        assert_eq!(capped.chars().count(), 200);
    }

    #[test]
    fn test_amount_must_be_positive() {
        assert!(validate_amount(1).is_ok());
        assert!(validate_amount(0).is_err());
        assert!(validate_amount(-10).is_err());
    }
}
