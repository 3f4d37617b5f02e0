//! Bet creation and lookup

use crate::{
    error::{Error, Result},
    payout,
    tables::BETS,
    types::{Bet, BetOption, BetStatus, BettorStake, NewBet, OpenBet, OpenWager, OptionId, OptionTotal},
    users,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use wagerbook_ledger::{Amount, BetId, ReadTables, UnitOfWork, UserId};

/// Fewest options a bet may have
pub const MIN_OPTIONS: usize = 2;

/// Most options a bet may have
pub const MAX_OPTIONS: usize = 10;

/// Longest accepted external link, in bytes
pub const MAX_EXTERNAL_URL_LEN: usize = 2048;

fn normalize_external_url(url: Option<String>) -> Result<Option<String>> {
    let url = match url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
        Some(url) => url,
        None => return Ok(None),
    };
    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return Err(Error::Validation(
            "external url must start with http:// or https://".to_string(),
        ));
    }
    if url.chars().any(char::is_whitespace) || url.len() > MAX_EXTERNAL_URL_LEN {
        return Err(Error::Validation("external url is malformed".to_string()));
    }
    Ok(Some(url))
}

/// Trim and check a new bet.
///
/// Blank options are dropped, as are case-insensitive duplicates (first one
/// wins). Between [`MIN_OPTIONS`] and [`MAX_OPTIONS`] must remain.
pub fn normalize_bet(input: NewBet, now: DateTime<Utc>) -> Result<NewBet> {
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(Error::Validation("title is required".to_string()));
    }

    let description = input
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let mut seen = HashSet::new();
    let options: Vec<String> = input
        .options
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .filter(|o| seen.insert(o.to_lowercase()))
        .map(str::to_string)
        .collect();
    if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
        return Err(Error::Validation(format!(
            "a bet needs between {} and {} distinct options, got {}",
            MIN_OPTIONS,
            MAX_OPTIONS,
            options.len()
        )));
    }

    if let Some(deadline) = input.deadline {
        if deadline <= now {
            return Err(Error::Validation(
                "deadline must be in the future".to_string(),
            ));
        }
    }

    let external_url = normalize_external_url(input.external_url)?;

    Ok(NewBet {
        title,
        description,
        external_url,
        options,
        deadline: input.deadline,
    })
}

/// Store a normalised bet
pub(crate) fn create_bet(uow: &UnitOfWork<'_>, creator: UserId, input: NewBet) -> Result<Bet> {
    let bet = Bet {
        id: BetId::new(),
        creator,
        title: input.title,
        description: input.description,
        external_url: input.external_url,
        options: input
            .options
            .into_iter()
            .zip(1u8..)
            .map(|(label, position)| BetOption {
                id: OptionId::new(),
                position,
                label,
            })
            .collect(),
        status: BetStatus::Open,
        deadline: input.deadline,
        created_at: Utc::now(),
        resolution_option_id: None,
        resolved_at: None,
        resolved_by: None,
    };
    uow.put(BETS, bet.id.as_bytes(), &bet)?;
    Ok(bet)
}

/// Bet by id
pub fn bet<R: ReadTables>(reader: &R, id: &BetId) -> Result<Option<Bet>> {
    Ok(reader.get(BETS, id.as_bytes())?)
}

/// Bet by id, failing with `NotFound`
pub fn require_bet<R: ReadTables>(reader: &R, id: &BetId) -> Result<Bet> {
    bet(reader, id)?.ok_or_else(|| Error::NotFound(format!("bet {}", id)))
}

/// Bet by id with its row locked until the unit of work ends
pub(crate) fn lock_bet(uow: &UnitOfWork<'_>, id: &BetId) -> Result<Bet> {
    uow.get_for_update(BETS, id.as_bytes())?
        .ok_or_else(|| Error::NotFound(format!("bet {}", id)))
}

/// Persist an updated bet
pub(crate) fn save_bet(uow: &UnitOfWork<'_>, bet: &Bet) -> Result<()> {
    uow.put(BETS, bet.id.as_bytes(), bet)?;
    Ok(())
}

/// Bets, newest first, optionally filtered by status
pub fn list_bets<R: ReadTables>(reader: &R, status: Option<BetStatus>) -> Result<Vec<Bet>> {
    let mut bets: Vec<Bet> = reader
        .scan_prefix::<Bet>(BETS, &[])?
        .into_iter()
        .map(|(_, bet)| bet)
        .filter(|bet| status.map_or(true, |s| bet.status == s))
        .collect();
    bets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    Ok(bets)
}

/// Stake per option in display order, each with its bettors largest first
pub fn option_totals<R: ReadTables>(reader: &R, bet: &Bet) -> Result<Vec<OptionTotal>> {
    let mut per_bettor: HashMap<(OptionId, UserId), Amount> = HashMap::new();
    for wager in payout::wagers_for_bet(reader, bet)? {
        let stake = per_bettor.entry((wager.option_id, wager.user_id)).or_insert(0);
        *stake = stake.saturating_add(wager.amount);
    }

    let mut names: HashMap<UserId, String> = HashMap::new();
    for (_, user) in per_bettor.keys() {
        if !names.contains_key(user) {
            let name = users::user(reader, user)?
                .map(|u| u.display_name)
                .unwrap_or_else(|| user.to_string());
            names.insert(*user, name);
        }
    }

    let mut options = bet.options.clone();
    options.sort_by_key(|o| o.position);
    Ok(options
        .into_iter()
        .map(|option| {
            let mut bettors: Vec<BettorStake> = per_bettor
                .iter()
                .filter(|((option_id, _), _)| *option_id == option.id)
                .map(|((_, user), amount)| BettorStake {
                    user_id: *user,
                    display_name: names.get(user).cloned().unwrap_or_default(),
                    amount: *amount,
                })
                .collect();
            bettors.sort_by(|a, b| {
                b.amount
                    .cmp(&a.amount)
                    .then_with(|| a.display_name.cmp(&b.display_name))
                    .then_with(|| a.user_id.cmp(&b.user_id))
            });
            let stake = bettors.iter().fold(0, |sum: Amount, b| sum.saturating_add(b.amount));
            OptionTotal {
                option_id: option.id,
                position: option.position,
                label: option.label,
                stake,
                bettors,
            }
        })
        .collect())
}

/// A user's stake per open bet, soonest deadline first (no deadline last),
/// then by title
pub fn open_wagers<R: ReadTables>(reader: &R, user: &UserId, limit: usize) -> Result<Vec<OpenWager>> {
    let mut rows = Vec::new();
    for bet in list_bets(reader, Some(BetStatus::Open))? {
        let amount = payout::wagers_for_bet(reader, &bet)?
            .iter()
            .filter(|w| w.user_id == *user)
            .fold(0, |sum: Amount, w| sum.saturating_add(w.amount));
        if amount > 0 {
            rows.push(OpenWager {
                bet_id: bet.id,
                title: bet.title,
                amount,
                deadline: bet.deadline,
            });
        }
    }
    rows.sort_by(|a, b| {
        match (a.deadline, b.deadline) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
        .then_with(|| a.title.cmp(&b.title))
    });
    rows.truncate(limit);
    Ok(rows)
}

/// Open bets created by `creator`, newest first, with their total stakes
pub fn open_bets_by_creator<R: ReadTables>(reader: &R, creator: &UserId, limit: usize) -> Result<Vec<OpenBet>> {
    let mut rows = Vec::new();
    for bet in list_bets(reader, Some(BetStatus::Open))?
        .into_iter()
        .filter(|b| b.creator == *creator)
        .take(limit)
    {
        let stakes = payout::wagers_for_bet(reader, &bet)?
            .iter()
            .fold(0, |sum: Amount, w| sum.saturating_add(w.amount));
        rows.push(OpenBet {
            bet_id: bet.id,
            title: bet.title,
            created_at: bet.created_at,
            deadline: bet.deadline,
            stakes,
        });
    }
    Ok(rows)
}
