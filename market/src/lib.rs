//! Wagerbook Market
//!
//! Prediction-market settlement on top of the wagerbook ledger: users stake
//! virtual currency on bet options, moderators resolve outcomes by
//! consensus, and escrow is paid out proportionally to the winners.
//!
//! # Architecture
//!
//! Every operation is one unit of work on the ledger's store:
//!
//! 1. **Admission**: validate the bet, lock the bettor's balance, move the
//!    stake into the bet's escrow, record the wager under its idempotency key
//! 2. **Resolution**: record the moderator's vote; unanimity at quorum closes
//!    the bet
//! 3. **Payout**: in the same unit of work, split the escrow among the
//!    winners (or sweep it to the house)
//! 4. **Notification**: after commit, off the caller's path
//!
//! # Example
//!
//! ```no_run
//! use wagerbook_market::{Caller, Config, Market, NewBet, Role};
//!
//! #[tokio::main]
//! async fn main() -> wagerbook_market::Result<()> {
//!     let market = Market::open(Config::default()).await?;
//!
//!     let alice = market.create_user("alice", "Alice", Role::User).await?;
//!     let admin = market.create_user("root", "Root", Role::Admin).await?;
//!     let alice = Caller::new(alice.id, alice.role);
//!     let admin = Caller::new(admin.id, admin.role);
//!
//!     market.gift(&admin, alice.user_id, 100, Some("welcome")).await?;
//!     let bet = market
//!         .create_bet(&alice, NewBet::new("Will it snow?", ["Yes", "No"]))
//!         .await?;
//!     let receipt = market
//!         .place_wager(&alice, bet.id, bet.options[0].id, 40, "req-1")
//!         .await?;
//!     println!("wager {} placed", receipt.wager.id);
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod bets;
pub mod config;
pub mod engine;
pub mod error;
pub mod leaderboard;
pub mod notify;
pub mod payout;
pub mod resolution;
pub mod tables;
pub mod transfers;
pub mod types;
pub mod users;
pub mod wager;

// Re-exports
pub use config::{Config, LogFormat};
pub use engine::Market;
pub use error::{Error, Result};
pub use notify::{Audience, LogNotifier, MemoryNotifier, Message, NoopNotifier, Notification, Notifier, NotifyError};
pub use tables::MARKET_TABLES;
pub use types::*;
