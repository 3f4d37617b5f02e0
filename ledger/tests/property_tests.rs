//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Zero-sum: every committed transaction nets to zero
//! - Conservation: the sum of all balances stays zero
//! - Non-negative wallets: rejected overdrafts leave no trace
//! - Chain validity: the hash chain verifies after any sequence of operations

use proptest::prelude::*;
use tempfile::TempDir;
use wagerbook_ledger::{
    AccountId, Amount, Config, Error, ErrorKind, Ledger, Posting, Reason, TransactionRequest,
    UserId,
};

/// One generated operation against a small set of users
#[derive(Debug, Clone, Copy)]
enum Op {
    Gift { to: usize, amount: Amount },
    Transfer { from: usize, to: usize, amount: Amount },
}

const USERS: usize = 4;

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..USERS, 1i64..500).prop_map(|(to, amount)| Op::Gift { to, amount }),
        (0..USERS, 0..USERS, 1i64..500)
            .prop_map(|(from, to, amount)| Op::Transfer { from, to, amount }),
    ]
}

/// Create test ledger with temp directory
async fn create_test_ledger() -> (Ledger, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();

    (Ledger::open(config).await.unwrap(), temp_dir)
}

async fn wallets(ledger: &Ledger, users: &[UserId]) -> Vec<AccountId> {
    let users = users.to_vec();
    ledger
        .execute("wallets", None, move |uow| {
            uow.ensure_house()?;
            users
                .iter()
                .map(|u| uow.ensure_default_wallet(*u).map(|a| a.id))
                .collect::<Result<Vec<_>, Error>>()
        })
        .await
        .unwrap()
}

async fn apply(ledger: &Ledger, wallets: &[AccountId], op: &Op) -> Result<(), Error> {
    let request = match *op {
        Op::Gift { to, amount } => {
            let wallet = wallets[to];
            return ledger
                .execute("gift", None, move |uow| {
                    let house = uow.ensure_house()?;
                    uow.record_transaction(&TransactionRequest::new(
                        Reason::Gift,
                        vec![Posting::debit(house.id, amount), Posting::credit(wallet, amount)],
                    ))
                })
                .await
                .map(|_| ());
        }
        Op::Transfer { from, to, amount } => TransactionRequest::new(
            Reason::Transfer,
            vec![Posting::debit(wallets[from], amount), Posting::credit(wallets[to], amount)],
        ),
    };
    ledger.record_transaction(request, None).await.map(|_| ())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: any mix of gifts and transfers keeps every invariant
    #[test]
    fn prop_operations_preserve_invariants(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;
            let users: Vec<UserId> = (0..USERS).map(|_| UserId::new()).collect();
            let wallets = wallets(&ledger, &users).await;

            let mut model = vec![0i64; USERS];
            let mut committed = 0u64;
            for op in &ops {
                let expected_ok = match *op {
                    Op::Gift { .. } => true,
                    Op::Transfer { from, to, amount } => from == to || model[from] >= amount,
                };
                let result = apply(&ledger, &wallets, op).await;
                prop_assert_eq!(result.is_ok(), expected_ok, "op {:?} -> {:?}", op, result);

                match (result, *op) {
                    (Ok(()), Op::Gift { to, amount }) => {
                        model[to] += amount;
                        committed += 1;
                    }
                    (Ok(()), Op::Transfer { from, to, amount }) => {
                        model[from] -= amount;
                        model[to] += amount;
                        committed += 1;
                    }
                    (Err(e), _) => prop_assert_eq!(e.kind(), ErrorKind::InsufficientFunds),
                }
            }

            for (i, wallet) in wallets.iter().enumerate() {
                let balance = ledger.balance(*wallet).await.unwrap();
                prop_assert!(balance >= 0);
                prop_assert_eq!(balance, model[i]);
            }

            prop_assert_eq!(ledger.total_supply().await.unwrap(), 0);
            prop_assert!(ledger.verify_balances().await.unwrap().is_empty());

            let report = ledger.verify_chain().await.unwrap();
            prop_assert!(report.is_valid());
            prop_assert_eq!(report.transactions_checked, committed);

            for record in ledger.transactions_page(0, 100).await.unwrap() {
                let sum: Amount = record.entries.iter().map(|e| e.delta).sum();
                prop_assert_eq!(sum, 0);
                prop_assert!(record.entries.len() >= 2);
            }
            Ok(())
        })?;
    }

    /// Property: unbalanced requests never reach the store
    #[test]
    fn prop_unbalanced_rejected(debit in 1i64..1000, credit in 1i64..1000) {
        prop_assume!(debit != credit);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;
            let wallets = wallets(&ledger, &[UserId::new()]).await;
            let house = ledger
                .read(|view| wagerbook_ledger::accounts::house(view))
                .await
                .unwrap()
                .unwrap();

            let err = ledger
                .record_transaction(
                    TransactionRequest::new(
                        Reason::Gift,
                        vec![Posting::debit(house.id, debit), Posting::credit(wallets[0], credit)],
                    ),
                    None,
                )
                .await
                .unwrap_err();
            prop_assert_eq!(err.kind(), ErrorKind::Validation);
            prop_assert_eq!(ledger.verify_chain().await.unwrap().transactions_checked, 0);
            Ok(())
        })?;
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_transfers_never_overdraw() {
        let (ledger, _temp) = create_test_ledger().await;
        let users: Vec<UserId> = (0..2).map(|_| UserId::new()).collect();
        let wallets = wallets(&ledger, &users).await;
        apply(&ledger, &wallets, &Op::Gift { to: 0, amount: 100 }).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            let wallets = wallets.clone();
            handles.push(tokio::spawn(async move {
                apply(&ledger, &wallets, &Op::Transfer { from: 0, to: 1, amount: 30 }).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 3);
        assert_eq!(ledger.balance(wallets[0]).await.unwrap(), 10);
        assert_eq!(ledger.balance(wallets[1]).await.unwrap(), 90);
        assert!(ledger.verify_chain().await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_reopen_keeps_chain() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();

        {
            let ledger = Ledger::open(config.clone()).await.unwrap();
            let wallets = wallets(&ledger, &[UserId::new()]).await;
            apply(&ledger, &wallets, &Op::Gift { to: 0, amount: 5 }).await.unwrap();
        }

        let ledger = Ledger::open(config).await.unwrap();
        let wallets = wallets(&ledger, &[UserId::new()]).await;
        apply(&ledger, &wallets, &Op::Gift { to: 0, amount: 6 }).await.unwrap();

        let report = ledger.verify_chain().await.unwrap();
        assert!(report.is_valid());
        assert_eq!(report.transactions_checked, 2);
    }
}
