//! Hall of fame: users ranked by wallet balance plus stake still in play

use crate::{
    bets,
    error::Result,
    payout,
    types::{BetStatus, LeaderboardEntry},
    users,
};
use std::collections::HashMap;
use wagerbook_ledger::{accounts, journal, Amount, ReadTables, UserId};

/// Top `limit` users by balance plus open stake, ties by display name
pub fn leaderboard<R: ReadTables>(reader: &R, limit: usize) -> Result<Vec<LeaderboardEntry>> {
    let balances = journal::all_balances(reader)?;

    let mut open_stakes: HashMap<UserId, Amount> = HashMap::new();
    for bet in bets::list_bets(reader, Some(BetStatus::Open))? {
        for wager in payout::wagers_for_bet(reader, &bet)? {
            let stake = open_stakes.entry(wager.user_id).or_insert(0);
            *stake = stake.saturating_add(wager.amount);
        }
    }

    let mut rows = Vec::new();
    for user in users::members(reader)? {
        let balance = match accounts::default_wallet(reader, &user.id)? {
            Some(wallet) => balances.get(&wallet.id).copied().unwrap_or(0),
            None => 0,
        };
        let open_stake = open_stakes.get(&user.id).copied().unwrap_or(0);
        rows.push(LeaderboardEntry {
            rank: 0,
            user_id: user.id,
            username: user.username,
            display_name: user.display_name,
            balance,
            open_stake,
            total: balance.saturating_add(open_stake),
        });
    }

    rows.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then_with(|| a.display_name.cmp(&b.display_name))
            .then_with(|| a.username.cmp(&b.username))
    });
    rows.truncate(limit);
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }
    Ok(rows)
}
