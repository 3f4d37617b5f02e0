//! Market domain types
//!
//! Everything persisted here is bincode encoded by the store, so field order
//! is part of the on-disk format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use wagerbook_ledger::{uuid_id, Amount, BetId, TransactionId, UserId};

uuid_id!(
    /// Bet option identifier
    OptionId
);
uuid_id!(
    /// Wager identifier
    WagerId
);

/// Platform role, ordered by privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Registered but not yet approved
    Unverified,
    /// Regular bettor
    User,
    /// May vote on resolutions
    Moderator,
    /// May override resolutions and mint funds
    Admin,
}

impl Role {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unverified => "unverified",
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unverified" => Ok(Role::Unverified),
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(crate::Error::Validation(format!("unknown role '{}'", other))),
        }
    }
}

/// Authenticated caller, as supplied by the identity collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    /// Caller's user id
    pub user_id: UserId,
    /// Caller's role
    pub role: Role,
}

impl Caller {
    /// New caller
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Fail with `Forbidden` unless the caller holds at least `min`
    pub fn require(&self, min: Role) -> crate::Result<()> {
        if self.role >= min {
            Ok(())
        } else {
            Err(crate::Error::Forbidden(format!(
                "role '{}' required, caller is '{}'",
                min, self.role
            )))
        }
    }
}

/// Registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: UserId,
    /// Login name, unique case-insensitively
    pub username: String,
    /// Name shown to others
    pub display_name: String,
    /// Role
    pub role: Role,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

/// One outcome of a bet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetOption {
    /// Option id
    pub id: OptionId,
    /// 1-based display position
    pub position: u8,
    /// Label
    pub label: String,
}

/// Bet lifecycle status. One-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetStatus {
    /// Accepting wagers or votes
    Open,
    /// Resolved and paid out
    Closed,
}

/// How a bet was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Unanimous moderator votes at quorum
    Consensus,
    /// Administrative override
    Override {
        /// Admin who forced the outcome
        admin: UserId,
    },
}

/// A proposition users can wager on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    /// Bet id
    pub id: BetId,
    /// Creator
    pub creator: UserId,
    /// Title
    pub title: String,
    /// Optional description
    pub description: Option<String>,
    /// Optional link to the source of the proposition
    pub external_url: Option<String>,
    /// 2 to 10 options in display order
    pub options: Vec<BetOption>,
    /// Status
    pub status: BetStatus,
    /// End of the staking period, if any
    pub deadline: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Winning option once closed
    pub resolution_option_id: Option<OptionId>,
    /// Close time
    pub resolved_at: Option<DateTime<Utc>>,
    /// Consensus or override
    pub resolved_by: Option<Resolution>,
}

impl Bet {
    /// Look up one of this bet's options
    pub fn option(&self, id: &OptionId) -> Option<&BetOption> {
        self.options.iter().find(|o| o.id == *id)
    }

    /// Whether the bet is still open
    pub fn is_open(&self) -> bool {
        self.status == BetStatus::Open
    }

    /// Whether the deadline, if any, is still ahead of `now`
    pub fn before_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map_or(true, |d| d > now)
    }

    /// Whether the staking period is over at `now` (no deadline counts as over)
    pub fn staking_over(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map_or(true, |d| d <= now)
    }
}

/// Input for creating a bet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBet {
    /// Title
    pub title: String,
    /// Optional description
    pub description: Option<String>,
    /// Optional http(s) link
    pub external_url: Option<String>,
    /// Raw option labels
    pub options: Vec<String>,
    /// Optional staking deadline
    pub deadline: Option<DateTime<Utc>>,
}

impl NewBet {
    /// New bet input with the given title and options
    pub fn new<S: Into<String>>(title: impl Into<String>, options: impl IntoIterator<Item = S>) -> Self {
        Self {
            title: title.into(),
            description: None,
            external_url: None,
            options: options.into_iter().map(Into::into).collect(),
            deadline: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the external link
    pub fn with_external_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = Some(url.into());
        self
    }

    /// Set the deadline
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// An admitted stake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wager {
    /// Wager id
    pub id: WagerId,
    /// Bet
    pub bet_id: BetId,
    /// Bettor
    pub user_id: UserId,
    /// Chosen option
    pub option_id: OptionId,
    /// Stake, always positive
    pub amount: Amount,
    /// Caller-supplied key, unique per user
    pub idempotency_key: String,
    /// Ledger transaction that moved the stake into escrow
    pub tx_id: TransactionId,
    /// Admission time
    pub created_at: DateTime<Utc>,
}

/// Whether a wager call moved funds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Admission {
    /// New wager, funds moved
    Placed,
    /// Key seen before, nothing moved
    AlreadyApplied,
}

/// Result of `place_wager`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WagerReceipt {
    /// The wager (the earlier one on resubmission)
    pub wager: Wager,
    /// Placed or already applied
    pub admission: Admission,
}

/// A moderator's current opinion on a bet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionVote {
    /// Bet
    pub bet_id: BetId,
    /// Moderator
    pub moderator: UserId,
    /// Option voted for
    pub option_id: OptionId,
    /// Time of the last change
    pub cast_at: DateTime<Utc>,
}

/// Resolution state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// No vote cast yet
    Open,
    /// At least one vote cast, wagers frozen
    VotingInProgress,
    /// Terminal
    Closed(OptionId),
}

/// One winner's share of a pot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Winner
    pub user_id: UserId,
    /// Summed winning stake
    pub stake: Amount,
    /// Amount paid
    pub share: Amount,
}

/// Funds moved when a bet closed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Bet
    pub bet_id: BetId,
    /// Winning option
    pub winning_option: OptionId,
    /// Sum of all stakes on the bet
    pub escrow_total: Amount,
    /// Shares paid to winners; empty when nobody won
    pub payouts: Vec<Payout>,
    /// Amount swept to the house when nobody backed the winner
    pub house_sweep: Amount,
    /// Ledger transaction, absent when the pot was empty
    pub tx_id: Option<TransactionId>,
}

impl Settlement {
    /// Total moved out of escrow
    pub fn distributed(&self) -> Amount {
        self.payouts.iter().map(|p| p.share).sum::<Amount>() + self.house_sweep
    }
}

/// Result of `cast_vote`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    /// Whether the vote was recorded (false when it repeated the live vote)
    pub accepted: bool,
    /// Phase after the vote
    pub phase: Phase,
    /// Payout, when this vote finalised the bet
    pub settlement: Option<Settlement>,
}

impl VoteOutcome {
    /// Whether this vote closed the bet
    pub fn finalized(&self) -> bool {
        self.settlement.is_some()
    }
}

/// Consensus status of a bet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStatus {
    /// Phase
    pub phase: Phase,
    /// Live votes
    pub votes: Vec<ResolutionVote>,
    /// Configured quorum
    pub quorum: usize,
    /// Quorum reached but moderators disagree
    pub stalled: bool,
}

/// Result of an airdrop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirdropReceipt {
    /// Ledger transaction
    pub tx_id: TransactionId,
    /// Recipients credited
    pub recipients: usize,
    /// Amount each recipient received
    pub amount: Amount,
    /// Amount debited from the house
    pub total: Amount,
}

/// One row of the hall of fame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based rank
    pub rank: usize,
    /// User
    pub user_id: UserId,
    /// Login name
    pub username: String,
    /// Display name
    pub display_name: String,
    /// Wallet balance
    pub balance: Amount,
    /// Stake in bets that are still open
    pub open_stake: Amount,
    /// Balance plus open stake
    pub total: Amount,
}

/// One bettor's summed stake on an option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BettorStake {
    /// Bettor
    pub user_id: UserId,
    /// Display name of the bettor
    pub display_name: String,
    /// Summed stake
    pub amount: Amount,
}

/// Stake on one option with its bettors, largest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionTotal {
    /// Option
    pub option_id: OptionId,
    /// 1-based display position
    pub position: u8,
    /// Label
    pub label: String,
    /// Sum of all stakes on the option
    pub stake: Amount,
    /// Per-bettor breakdown
    pub bettors: Vec<BettorStake>,
}

/// A user's summed stake in one open bet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenWager {
    /// Bet
    pub bet_id: BetId,
    /// Bet title
    pub title: String,
    /// Summed stake of the user
    pub amount: Amount,
    /// End of the staking period, if any
    pub deadline: Option<DateTime<Utc>>,
}

/// An open bet with everything staked on it so far
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenBet {
    /// Bet
    pub bet_id: BetId,
    /// Title
    pub title: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// End of the staking period, if any
    pub deadline: Option<DateTime<Utc>>,
    /// Sum of all stakes
    pub stakes: Amount,
}

/// A user's standing: wallet, stake still in play and bets they run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    /// The user
    pub user: User,
    /// Wallet balance
    pub balance: Amount,
    /// Stake in bets that are still open
    pub open_stake: Amount,
    /// Open bets the user has staked on, soonest deadline first
    pub open_wagers: Vec<OpenWager>,
    /// Open bets the user created, newest first
    pub open_bets: Vec<OpenBet>,
}
