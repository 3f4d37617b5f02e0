//! Market engine
//!
//! Async entry points for every market operation. Each call checks the
//! caller's role and its input, runs one unit of work on the ledger under the
//! operation's deadline, and only after commit hands a notification to the
//! dispatcher.

use crate::{
    bets, leaderboard,
    notify::{Dispatcher, NoopNotifier, Notification, Notifier},
    payout, resolution,
    tables::MARKET_TABLES,
    transfers,
    types::{
        Admission, AirdropReceipt, Bet, BetStatus, Caller, LeaderboardEntry, NewBet, OpenWager,
        OptionId, OptionTotal, Portfolio, ResolutionStatus, Role, Settlement, User, VoteOutcome,
        Wager, WagerReceipt,
    },
    users, wager, Config, Error, Result,
};
use chrono::Utc;
use std::sync::Arc;
use wagerbook_ledger::{
    accounts, journal, Amount, BetId, ChainReport, HistoryItem, Ledger, ProjectionHandle,
    TransactionId, TransactionRecord, UserId,
};

/// Prediction market over the wagerbook ledger
#[derive(Debug, Clone)]
pub struct Market {
    ledger: Ledger,
    config: Arc<Config>,
    dispatcher: Dispatcher,
}

impl Market {
    /// Open the market without notifications
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with_notifier(config, Arc::new(NoopNotifier)).await
    }

    /// Open the market, delivering notifications through `notifier`
    pub async fn open_with_notifier(config: Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        config.validate()?;
        let ledger = Ledger::open_with_tables(config.ledger.clone(), MARKET_TABLES).await?;

        tracing::info!(
            data_dir = ?config.ledger.data_dir,
            quorum = config.resolution.quorum,
            "Market opened"
        );

        Ok(Self {
            ledger,
            config: Arc::new(config),
            dispatcher: Dispatcher::new(notifier),
        })
    }

    /// Underlying ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start refreshing the cached balance projection
    pub fn start_projection(&self) -> ProjectionHandle {
        self.ledger.start_projection()
    }

    // Users

    /// Create a user with its default wallet
    pub async fn create_user(&self, username: &str, display_name: &str, role: Role) -> Result<User> {
        let (username, display_name) = users::normalize_new_user(username, display_name)?;

        let user = self
            .ledger
            .execute("create_user", Some(self.config.timeouts.user()), move |uow| {
                users::create_user(uow, &username, &display_name, role)
            })
            .await?;

        tracing::info!(user_id = %user.id, username = %user.username, %role, "User created");
        self.dispatcher.send(Notification::UserCreated {
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            verified: role > Role::Unverified,
        });
        Ok(user)
    }

    /// Self-service registration; the account starts unverified
    pub async fn register(&self, username: &str, display_name: &str) -> Result<User> {
        self.create_user(username, display_name, Role::Unverified).await
    }

    /// Change a user's role. Admin only.
    pub async fn set_role(&self, caller: &Caller, username: &str, role: Role) -> Result<User> {
        caller.require(Role::Admin)?;
        let username = username.trim().to_string();

        let user = self
            .ledger
            .execute("set_role", Some(self.config.timeouts.user()), move |uow| {
                users::set_role(uow, &username, role)
            })
            .await?;

        tracing::info!(user_id = %user.id, admin = %caller.user_id, %role, "Role changed");
        Ok(user)
    }

    /// User by id
    pub async fn user(&self, id: UserId) -> Result<User> {
        self.ledger
            .read(move |view| users::require_user(view, &id))
            .await
    }

    /// User by username, case-insensitively
    pub async fn user_by_username(&self, username: &str) -> Result<User> {
        let username = username.to_string();
        self.ledger
            .read(move |view| {
                users::user_by_username(view, &username)?
                    .ok_or_else(|| Error::NotFound(format!("user '{}'", username)))
            })
            .await
    }

    // Bets

    /// Create a bet
    pub async fn create_bet(&self, caller: &Caller, input: NewBet) -> Result<Bet> {
        caller.require(Role::User)?;
        let input = bets::normalize_bet(input, Utc::now())?;
        let creator = caller.user_id;

        let bet = self
            .ledger
            .execute("create_bet", Some(self.config.timeouts.bet()), move |uow| {
                users::require_user(&*uow, &creator)?;
                bets::create_bet(uow, creator, input)
            })
            .await?;

        tracing::info!(bet_id = %bet.id, user_id = %creator, options = bet.options.len(), "Bet created");
        self.dispatcher.send(Notification::BetCreated {
            bet_id: bet.id,
            creator,
            title: bet.title.clone(),
            description: bet.description.clone(),
            deadline: bet.deadline,
        });
        Ok(bet)
    }

    /// Bet by id
    pub async fn bet(&self, id: BetId) -> Result<Bet> {
        self.ledger.read(move |view| bets::require_bet(view, &id)).await
    }

    /// Bets, newest first
    pub async fn bets(&self, status: Option<BetStatus>) -> Result<Vec<Bet>> {
        self.ledger.read(move |view| bets::list_bets(view, status)).await
    }

    /// Wagers on a bet, oldest first
    pub async fn wagers(&self, bet_id: BetId) -> Result<Vec<Wager>> {
        self.ledger
            .read(move |view| {
                let bet = bets::require_bet(view, &bet_id)?;
                payout::wagers_for_bet(view, &bet)
            })
            .await
    }

    /// Stake per option with the bettors behind it
    pub async fn option_totals(&self, bet_id: BetId) -> Result<Vec<OptionTotal>> {
        self.ledger
            .read(move |view| {
                let bet = bets::require_bet(view, &bet_id)?;
                bets::option_totals(view, &bet)
            })
            .await
    }

    /// A user's stakes in bets that are still open
    pub async fn open_wagers(&self, user: UserId) -> Result<Vec<OpenWager>> {
        let limit = self.config.limits.profile_items;
        self.ledger
            .read(move |view| {
                users::require_user(view, &user)?;
                bets::open_wagers(view, &user, limit)
            })
            .await
    }

    /// Profile view of a user: wallet, open stake, open wagers and open bets
    /// they created
    pub async fn portfolio(&self, user: UserId) -> Result<Portfolio> {
        let limit = self.config.limits.profile_items;
        self.ledger
            .read(move |view| {
                let profile = users::require_user(view, &user)?;
                let balance = match accounts::default_wallet(view, &user)? {
                    Some(wallet) => journal::balance(view, &wallet.id)?,
                    None => 0,
                };
                let open_wagers = bets::open_wagers(view, &user, usize::MAX)?;
                let open_stake = open_wagers
                    .iter()
                    .fold(0, |sum: Amount, w| sum.saturating_add(w.amount));
                Ok::<_, Error>(Portfolio {
                    user: profile,
                    balance,
                    open_stake,
                    open_wagers: open_wagers.into_iter().take(limit).collect(),
                    open_bets: bets::open_bets_by_creator(view, &user, limit)?,
                })
            })
            .await
    }

    // Wagers

    /// Stake `amount` on one option of an open bet.
    ///
    /// Resubmitting with the same idempotency key returns the wager recorded
    /// first with [`Admission::AlreadyApplied`]; no funds move again.
    pub async fn place_wager(
        &self,
        caller: &Caller,
        bet_id: BetId,
        option_id: OptionId,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<WagerReceipt> {
        caller.require(Role::User)?;
        let key = wager::validate_submission(amount, idempotency_key)?;
        let user = caller.user_id;

        let result = self
            .ledger
            .execute("place_wager", Some(self.config.timeouts.wager()), move |uow| {
                let (receipt, bet) =
                    wager::place_wager(uow, user, bet_id, option_id, amount, &key, Utc::now())?;
                let bettor = users::require_user(&*uow, &user)?;
                Ok::<_, Error>((receipt, bet, bettor))
            })
            .await;

        let (receipt, bet, bettor) = match result {
            Ok(admitted) => admitted,
            Err(Error::DuplicateSubmission(prior)) => {
                return Ok(WagerReceipt {
                    wager: *prior,
                    admission: Admission::AlreadyApplied,
                })
            }
            Err(e) => return Err(e),
        };

        if receipt.admission == Admission::Placed {
            let option_label = bet
                .option(&option_id)
                .map(|o| o.label.clone())
                .unwrap_or_default();
            self.dispatcher.send(Notification::WagerPlaced {
                bet_id,
                title: bet.title,
                creator: bet.creator,
                bettor: user,
                bettor_name: bettor.display_name,
                option_label,
                amount,
            });
        }
        Ok(receipt)
    }

    // Resolution

    /// Cast or change a moderator's vote. Closes and pays out the bet when the
    /// live votes are unanimous at quorum.
    pub async fn cast_vote(&self, caller: &Caller, bet_id: BetId, option_id: OptionId) -> Result<VoteOutcome> {
        caller.require(Role::Moderator)?;
        let moderator = caller.user_id;
        let quorum = self.config.resolution.quorum;

        let (outcome, bet, moderator_name, stalled) = self
            .ledger
            .execute("cast_vote", Some(self.config.timeouts.vote()), move |uow| {
                let moderator_name = users::require_user(&*uow, &moderator)?.display_name;
                let (outcome, bet) =
                    resolution::cast_vote(uow, moderator, bet_id, option_id, quorum, Utc::now())?;
                let status = resolution::resolution_status(&*uow, &bet_id, quorum)?;
                Ok::<_, Error>((outcome, bet, moderator_name, status.stalled.then_some(status.votes.len())))
            })
            .await?;

        let label = |id: &OptionId| bet.option(id).map(|o| o.label.clone()).unwrap_or_default();
        if outcome.accepted {
            self.dispatcher.send(Notification::VoteCast {
                bet_id,
                title: bet.title.clone(),
                moderator_name,
                option_label: label(&option_id),
            });
        }
        if let Some(votes) = stalled {
            self.dispatcher.send(Notification::VotingStalled {
                bet_id,
                title: bet.title.clone(),
                votes,
            });
        }
        if let Some(settlement) = &outcome.settlement {
            self.dispatcher.send(Notification::BetResolved {
                bet_id,
                title: bet.title.clone(),
                winner_label: label(&settlement.winning_option),
                overridden: false,
            });
        }
        Ok(outcome)
    }

    /// Close a bet on `option_id` irrespective of votes. Admin only.
    pub async fn override_resolution(
        &self,
        caller: &Caller,
        bet_id: BetId,
        option_id: OptionId,
    ) -> Result<Settlement> {
        caller.require(Role::Admin)?;
        let admin = caller.user_id;

        let (settlement, bet) = self
            .ledger
            .execute("override_resolution", Some(self.config.timeouts.vote()), move |uow| {
                resolution::override_resolution(uow, admin, bet_id, option_id, Utc::now())
            })
            .await?;

        self.dispatcher.send(Notification::BetResolved {
            bet_id,
            title: bet.title.clone(),
            winner_label: bet
                .option(&option_id)
                .map(|o| o.label.clone())
                .unwrap_or_default(),
            overridden: true,
        });
        Ok(settlement)
    }

    /// Phase, votes and stall state of a bet
    pub async fn resolution_status(&self, bet_id: BetId) -> Result<ResolutionStatus> {
        let quorum = self.config.resolution.quorum;
        self.ledger
            .read(move |view| resolution::resolution_status(view, &bet_id, quorum))
            .await
    }

    // Transfers

    /// House pays `amount` to one user. Admin only.
    pub async fn gift(&self, caller: &Caller, recipient: UserId, amount: Amount, note: Option<&str>) -> Result<TransactionId> {
        caller.require(Role::Admin)?;
        transfers::validate_amount(amount)?;
        let note = transfers::normalize_note(note, self.config.limits.note_max_chars);
        let tx_note = note.clone();

        let tx_id = self
            .ledger
            .execute("gift", Some(self.config.timeouts.gift()), move |uow| {
                transfers::gift(uow, recipient, amount, tx_note.as_deref())
            })
            .await?;

        self.dispatcher.send(Notification::GiftSent {
            recipient,
            amount,
            note,
        });
        Ok(tx_id)
    }

    /// House pays `amount` to every user. Admin only.
    pub async fn airdrop(&self, caller: &Caller, amount: Amount, note: Option<&str>) -> Result<AirdropReceipt> {
        caller.require(Role::Admin)?;
        transfers::validate_amount(amount)?;
        let note = transfers::normalize_note(note, self.config.limits.note_max_chars);
        let tx_note = note.clone();

        let (receipt, recipients) = self
            .ledger
            .execute("airdrop", Some(self.config.timeouts.airdrop()), move |uow| {
                let receipt = transfers::airdrop(uow, amount, tx_note.as_deref())?;
                let recipients: Vec<UserId> = users::members(&*uow)?.into_iter().map(|u| u.id).collect();
                Ok::<_, Error>((receipt, recipients))
            })
            .await?;

        self.dispatcher.send(Notification::AirdropSent {
            recipients,
            amount,
            note,
        });
        Ok(receipt)
    }

    /// Move `amount` from the caller's wallet to another user's
    pub async fn transfer(&self, caller: &Caller, recipient: UserId, amount: Amount, note: Option<&str>) -> Result<TransactionId> {
        caller.require(Role::User)?;
        transfers::validate_amount(amount)?;
        let note = transfers::normalize_note(note, self.config.limits.note_max_chars);
        let tx_note = note.clone();
        let sender = caller.user_id;

        let (tx_id, sender_user, recipient_user) = self
            .ledger
            .execute("transfer", Some(self.config.timeouts.transfer()), move |uow| {
                let tx_id = transfers::transfer(uow, sender, recipient, amount, tx_note.as_deref())?;
                let sender_user = users::require_user(&*uow, &sender)?;
                let recipient_user = users::require_user(&*uow, &recipient)?;
                Ok::<_, Error>((tx_id, sender_user, recipient_user))
            })
            .await?;

        self.dispatcher.send(Notification::TransferSent {
            sender,
            sender_name: sender_user.display_name,
            recipient,
            recipient_name: recipient_user.display_name,
            amount,
            note,
        });
        Ok(tx_id)
    }

    // Reads

    /// Authoritative wallet balance of a user
    pub async fn balance(&self, user: UserId) -> Result<Amount> {
        self.ledger
            .read(move |view| {
                let wallet = accounts::default_wallet(view, &user)?
                    .ok_or_else(|| Error::NotFound(format!("wallet of user {}", user)))?;
                Ok::<_, Error>(journal::balance(view, &wallet.id)?)
            })
            .await
    }

    /// Wallet balance from the cached projection, if it has seen the wallet
    pub async fn cached_balance(&self, user: UserId) -> Result<Option<Amount>> {
        let wallet = self
            .ledger
            .read(move |view| Ok::<_, Error>(accounts::default_wallet(view, &user)?))
            .await?;
        Ok(wallet.and_then(|w| self.ledger.projection().get(&w.id)))
    }

    /// Escrow held for a bet
    pub async fn escrow_balance(&self, bet_id: BetId) -> Result<Amount> {
        self.ledger
            .read(move |view| match accounts::escrow(view, &bet_id)? {
                Some(escrow) => Ok(journal::balance(view, &escrow.id)?),
                None => Ok::<_, Error>(0),
            })
            .await
    }

    /// Statement of a user's wallet, newest first
    pub async fn account_history(&self, user: UserId, limit: usize) -> Result<Vec<HistoryItem>> {
        self.ledger
            .read(move |view| {
                let wallet = accounts::default_wallet(view, &user)?
                    .ok_or_else(|| Error::NotFound(format!("wallet of user {}", user)))?;
                Ok::<_, Error>(journal::account_history(view, &wallet.id, limit)?)
            })
            .await
    }

    /// Public transaction log, newest first
    pub async fn transactions(&self, offset: usize, limit: usize) -> Result<Vec<TransactionRecord>> {
        Ok(self.ledger.transactions_page(offset, limit).await?)
    }

    /// Hall of fame
    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        let limit = self.config.limits.leaderboard_size;
        self.ledger
            .read(move |view| leaderboard::leaderboard(view, limit))
            .await
    }

    /// Verify the hash chain
    pub async fn verify_chain(&self) -> Result<ChainReport> {
        Ok(self.ledger.verify_chain().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_market() -> (Market, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.ledger.data_dir = temp_dir.path().to_path_buf();
        (Market::open(config).await.unwrap(), temp_dir)
    }

    #[tokio::test]
    async fn test_market_open() {
        let (market, _temp) = create_test_market().await;
        assert_eq!(market.config().resolution.quorum, 2);
        assert!(market.verify_chain().await.unwrap().is_valid());
        assert!(market.bets(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_usernames_unique_case_insensitively() {
        let (market, _temp) = create_test_market().await;
        market.create_user("Alice", "Alice", Role::User).await.unwrap();

        let err = market.create_user("alice", "Other Alice", Role::User).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(market.user_by_username("ALICE").await.unwrap().display_name, "Alice");
    }

    #[tokio::test]
    async fn test_new_user_has_empty_wallet() {
        let (market, _temp) = create_test_market().await;
        let user = market.register("bob", "Bob").await.unwrap();

        assert_eq!(user.role, Role::Unverified);
        assert_eq!(market.balance(user.id).await.unwrap(), 0);
        assert!(market.account_history(user.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_role_requires_admin() {
        let (market, _temp) = create_test_market().await;
        let user = market.register("carol", "Carol").await.unwrap();
        let admin = Caller::new(UserId::new(), Role::Admin);

        let err = market
            .set_role(&Caller::new(user.id, Role::Moderator), "carol", Role::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let updated = market.set_role(&admin, "Carol", Role::User).await.unwrap();
        assert_eq!(updated.role, Role::User);
        assert_eq!(market.user(user.id).await.unwrap().role, Role::User);
    }
}
