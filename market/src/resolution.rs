//! Resolution consensus
//!
//! ```text
//!            first vote                 unanimous at quorum
//!   Open ───────────────► VotingInProgress ─────────────────► Closed(option)
//!                          │   ▲                                   ▲
//!                          └───┘ change vote / disagree (stalled)  │
//!                          └──────────── admin override ───────────┘
//! ```
//!
//! Votes are accepted once the staking period is over (or when the bet has no
//! deadline). A bet closes in the same unit of work that pays it out.

use crate::{
    bets,
    error::{Error, Result},
    payout,
    tables::{keys, VOTES},
    types::{Bet, BetStatus, OptionId, Phase, Resolution, ResolutionStatus, ResolutionVote, Settlement, VoteOutcome},
};
use chrono::{DateTime, Utc};
use wagerbook_ledger::{BetId, ReadTables, UnitOfWork, UserId};

/// Where the live votes stand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consensus {
    /// Fewer votes than the quorum
    Pending,
    /// Quorum reached and every vote names this option
    Agreed(OptionId),
    /// Quorum reached but votes differ
    Stalled,
}

/// Evaluate unanimity at quorum
pub fn consensus(votes: &[ResolutionVote], quorum: usize) -> Consensus {
    if votes.is_empty() || votes.len() < quorum {
        return Consensus::Pending;
    }
    let first = votes[0].option_id;
    if votes.iter().all(|v| v.option_id == first) {
        Consensus::Agreed(first)
    } else {
        Consensus::Stalled
    }
}

/// Phase of a bet given its live votes
pub fn phase(bet: &Bet, votes: &[ResolutionVote]) -> Phase {
    match (bet.status, bet.resolution_option_id) {
        (BetStatus::Closed, Some(option)) => Phase::Closed(option),
        _ if !votes.is_empty() => Phase::VotingInProgress,
        _ => Phase::Open,
    }
}

/// Live votes on a bet
pub fn votes_for_bet<R: ReadTables>(reader: &R, bet: &BetId) -> Result<Vec<ResolutionVote>> {
    Ok(reader
        .scan_prefix::<ResolutionVote>(VOTES, bet.as_bytes())?
        .into_iter()
        .map(|(_, vote)| vote)
        .collect())
}

/// Phase, votes and stall state of a bet
pub fn resolution_status<R: ReadTables>(reader: &R, bet_id: &BetId, quorum: usize) -> Result<ResolutionStatus> {
    let bet = bets::require_bet(reader, bet_id)?;
    let votes = votes_for_bet(reader, bet_id)?;
    let stalled = bet.is_open() && consensus(&votes, quorum) == Consensus::Stalled;
    Ok(ResolutionStatus {
        phase: phase(&bet, &votes),
        votes,
        quorum,
        stalled,
    })
}

/// Lock a bet that can be resolved on `option` at `now`
fn resolvable_bet(uow: &UnitOfWork<'_>, bet_id: &BetId, option: &OptionId, now: DateTime<Utc>) -> Result<Bet> {
    let bet = bets::lock_bet(uow, bet_id)?;
    if bet.option(option).is_none() {
        return Err(Error::NotFound(format!("option {} on bet {}", option, bet_id)));
    }
    if !bet.is_open() {
        return Err(Error::Conflict("bet is already closed".to_string()));
    }
    if !bet.staking_over(now) {
        return Err(Error::Conflict(
            "staking period has not ended yet".to_string(),
        ));
    }
    Ok(bet)
}

/// Record or change a moderator's vote; closes and pays out the bet when the
/// votes become unanimous at quorum.
///
/// Returns the outcome and the bet as it stands after the vote.
pub(crate) fn cast_vote(
    uow: &mut UnitOfWork<'_>,
    moderator: UserId,
    bet_id: BetId,
    option_id: OptionId,
    quorum: usize,
    now: DateTime<Utc>,
) -> Result<(VoteOutcome, Bet)> {
    let bet = resolvable_bet(uow, &bet_id, &option_id, now)?;

    let key = keys::vote(&bet_id, &moderator);
    let live: Option<ResolutionVote> = uow.get_for_update(VOTES, &key)?;
    let accepted = live.map_or(true, |v| v.option_id != option_id);
    if accepted {
        uow.put(
            VOTES,
            &key,
            &ResolutionVote {
                bet_id,
                moderator,
                option_id,
                cast_at: now,
            },
        )?;
        tracing::info!(bet_id = %bet_id, user_id = %moderator, option_id = %option_id, "Resolution vote cast");
    }

    let votes = votes_for_bet(&*uow, &bet_id)?;
    match consensus(&votes, quorum) {
        Consensus::Agreed(winner) => {
            let (settlement, bet) = close(uow, bet, winner, Resolution::Consensus, now)?;
            Ok((
                VoteOutcome {
                    accepted,
                    phase: Phase::Closed(winner),
                    settlement: Some(settlement),
                },
                bet,
            ))
        }
        state => {
            if state == Consensus::Stalled {
                tracing::warn!(
                    bet_id = %bet_id,
                    votes = votes.len(),
                    quorum,
                    "Moderators disagree at quorum, resolution stalled"
                );
            }
            Ok((
                VoteOutcome {
                    accepted,
                    phase: Phase::VotingInProgress,
                    settlement: None,
                },
                bet,
            ))
        }
    }
}

/// Close a bet on `option` regardless of votes
pub(crate) fn override_resolution(
    uow: &mut UnitOfWork<'_>,
    admin: UserId,
    bet_id: BetId,
    option_id: OptionId,
    now: DateTime<Utc>,
) -> Result<(Settlement, Bet)> {
    let bet = resolvable_bet(uow, &bet_id, &option_id, now)?;
    let votes = votes_for_bet(&*uow, &bet_id)?;
    tracing::info!(
        bet_id = %bet_id,
        user_id = %admin,
        option_id = %option_id,
        votes = votes.len(),
        "Resolution overridden"
    );
    close(uow, bet, option_id, Resolution::Override { admin }, now)
}

/// Flip the bet to closed and pay it out in the same unit of work
fn close(
    uow: &mut UnitOfWork<'_>,
    mut bet: Bet,
    winner: OptionId,
    resolution: Resolution,
    now: DateTime<Utc>,
) -> Result<(Settlement, Bet)> {
    bet.status = BetStatus::Closed;
    bet.resolution_option_id = Some(winner);
    bet.resolved_at = Some(now);
    bet.resolved_by = Some(resolution);
    bets::save_bet(uow, &bet)?;

    let settlement = payout::distribute(uow, &bet, winner)?;
    tracing::info!(bet_id = %bet.id, option_id = %winner, ?resolution, "Bet closed");
    Ok((settlement, bet))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(option: OptionId) -> ResolutionVote {
        ResolutionVote {
            bet_id: BetId::new(),
            moderator: UserId::new(),
            option_id: option,
            cast_at: Utc::now(),
        }
    }

    #[test]
    fn test_unanimity_at_quorum() {
        let (x, y) = (OptionId::new(), OptionId::new());

        assert_eq!(consensus(&[], 1), Consensus::Pending);
        assert_eq!(consensus(&[vote(x)], 2), Consensus::Pending);
        assert_eq!(consensus(&[vote(x), vote(x)], 2), Consensus::Agreed(x));
        assert_eq!(consensus(&[vote(x), vote(y)], 2), Consensus::Stalled);
        assert_eq!(consensus(&[vote(x), vote(x), vote(y)], 2), Consensus::Stalled);
        assert_eq!(consensus(&[vote(y)], 1), Consensus::Agreed(y));
    }

    #[test]
    fn test_disagreement_below_quorum_is_pending() {
        let (x, y) = (OptionId::new(), OptionId::new());
        assert_eq!(consensus(&[vote(x), vote(y)], 3), Consensus::Pending);
    }
}
