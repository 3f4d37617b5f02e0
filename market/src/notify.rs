//! Notifications
//!
//! Fire-and-forget messages sent after a unit of work commits. Delivery runs
//! on the blocking pool; a failing notifier is logged and never affects the
//! committed operation.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use wagerbook_ledger::{Amount, BetId, UserId};

/// Delivery failure reported by a notifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Who a message is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Audience {
    /// Platform administrators
    Admins,
    /// The community channel
    Group,
    /// One user
    User(UserId),
}

/// Rendered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Recipient
    pub audience: Audience,
    /// Text
    pub text: String,
}

impl Message {
    fn new(audience: Audience, text: impl Into<String>) -> Self {
        Self {
            audience,
            text: text.into(),
        }
    }
}

/// Committed event worth telling someone about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Notification {
    UserCreated {
        username: String,
        display_name: String,
        verified: bool,
    },
    BetCreated {
        bet_id: BetId,
        creator: UserId,
        title: String,
        description: Option<String>,
        deadline: Option<DateTime<Utc>>,
    },
    WagerPlaced {
        bet_id: BetId,
        title: String,
        creator: UserId,
        bettor: UserId,
        bettor_name: String,
        option_label: String,
        amount: Amount,
    },
    VoteCast {
        bet_id: BetId,
        title: String,
        moderator_name: String,
        option_label: String,
    },
    VotingStalled {
        bet_id: BetId,
        title: String,
        votes: usize,
    },
    BetResolved {
        bet_id: BetId,
        title: String,
        winner_label: String,
        overridden: bool,
    },
    GiftSent {
        recipient: UserId,
        amount: Amount,
        note: Option<String>,
    },
    AirdropSent {
        recipients: Vec<UserId>,
        amount: Amount,
        note: Option<String>,
    },
    TransferSent {
        sender: UserId,
        sender_name: String,
        recipient: UserId,
        recipient_name: String,
        amount: Amount,
        note: Option<String>,
    },
}

/// Group messages quote at most this many characters of a bet description
const DESCRIPTION_PREVIEW_CHARS: usize = 200;

fn coins(amount: Amount, note: &Option<String>) -> String {
    match note {
        Some(note) => format!("{} coins\nNote: {}", amount, note),
        None => format!("{} coins", amount),
    }
}

impl Notification {
    /// Render into per-audience messages
    pub fn messages(&self) -> Vec<Message> {
        match self {
            Notification::UserCreated {
                username,
                display_name,
                verified,
            } => {
                let verb = if *verified { "created" } else { "requested" };
                vec![Message::new(
                    Audience::Admins,
                    format!("New account {}: {} ({})", verb, username, display_name),
                )]
            }
            Notification::BetCreated {
                creator,
                title,
                description,
                deadline,
                ..
            } => {
                let mut group = format!("New bet: {}", title);
                if let Some(description) = description {
                    let preview: String = description.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
                    group.push('\n');
                    group.push_str(&preview);
                    if description.chars().count() > DESCRIPTION_PREVIEW_CHARS {
                        group.push('…');
                    }
                }
                if let Some(deadline) = deadline {
                    group.push_str(&format!("\nDeadline: {}", deadline.format("%Y-%m-%d %H:%M UTC")));
                }
                vec![
                    Message::new(Audience::Group, group),
                    Message::new(Audience::User(*creator), format!("Your bet \"{}\" is live!", title)),
                ]
            }
            Notification::WagerPlaced {
                title,
                creator,
                bettor,
                bettor_name,
                option_label,
                amount,
                ..
            } => {
                let mut messages = vec![Message::new(
                    Audience::Group,
                    format!(
                        "{} wagered {} coins on \"{}\" (option: {})",
                        bettor_name, amount, title, option_label
                    ),
                )];
                if creator != bettor {
                    messages.push(Message::new(
                        Audience::User(*creator),
                        format!(
                            "Your bet \"{}\" received a new wager from {}: {} coins on {}.",
                            title, bettor_name, amount, option_label
                        ),
                    ));
                }
                messages
            }
            Notification::VoteCast {
                title,
                moderator_name,
                option_label,
                ..
            } => vec![Message::new(
                Audience::Admins,
                format!(
                    "Moderator {} voted '{}' on bet '{}'",
                    moderator_name, option_label, title
                ),
            )],
            Notification::VotingStalled { title, votes, .. } => vec![Message::new(
                Audience::Admins,
                format!(
                    "Bet '{}' is stalled: {} moderators disagree, an override is needed",
                    title, votes
                ),
            )],
            Notification::BetResolved {
                title,
                winner_label,
                overridden,
                ..
            } => {
                let how = if *overridden { " by override" } else { "" };
                vec![
                    Message::new(
                        Audience::Admins,
                        format!("Bet '{}' closed{}. Winner: {}", title, how, winner_label),
                    ),
                    Message::new(
                        Audience::Group,
                        format!("Bet resolved: {}. Winner: {}", title, winner_label),
                    ),
                ]
            }
            Notification::GiftSent {
                recipient,
                amount,
                note,
            } => vec![Message::new(
                Audience::User(*recipient),
                format!("You received a gift of {}.", coins(*amount, note)),
            )],
            Notification::AirdropSent {
                recipients,
                amount,
                note,
            } => recipients
                .iter()
                .map(|user| {
                    Message::new(
                        Audience::User(*user),
                        format!("Airdrop! You received {}.", coins(*amount, note)),
                    )
                })
                .collect(),
            Notification::TransferSent {
                sender,
                sender_name,
                recipient,
                recipient_name,
                amount,
                note,
            } => {
                let summary = coins(*amount, note);
                vec![
                    Message::new(
                        Audience::User(*sender),
                        format!("You sent {} to {}.", summary, recipient_name),
                    ),
                    Message::new(
                        Audience::User(*recipient),
                        format!("{} sent you {}.", sender_name, summary),
                    ),
                ]
            }
        }
    }
}

/// Delivery channel (chat bot, mail, ...)
pub trait Notifier: Send + Sync + 'static {
    /// Deliver one message. Called on the blocking pool.
    fn deliver(&self, message: &Message) -> Result<(), NotifyError>;
}

/// Drops every message
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn deliver(&self, _message: &Message) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Writes every message to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver(&self, message: &Message) -> Result<(), NotifyError> {
        tracing::info!(audience = ?message.audience, text = %message.text, "Notification");
        Ok(())
    }
}

/// Keeps every message in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl MemoryNotifier {
    /// Empty notifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered so far
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn deliver(&self, message: &Message) -> Result<(), NotifyError> {
        self.messages.lock().push(message.clone());
        Ok(())
    }
}

/// Sends notifications off the caller's path
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher over `notifier`
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Deliver in the background. Must be called inside a tokio runtime.
    pub fn send(&self, notification: Notification) {
        let notifier = Arc::clone(&self.notifier);
        tokio::task::spawn_blocking(move || {
            for message in notification.messages() {
                if let Err(e) = notifier.deliver(&message) {
                    tracing::warn!(audience = ?message.audience, error = %e, "Notification delivery failed");
                }
            }
        });
    }
}
