use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::warn;

use crate::decay::DecayTable;
use crate::error::ConfigError;
use crate::gate::Phase;
use crate::records::{Record, Tag, TagSettings, Vote};
use crate::types::{TagKey, Timestamp, UserKey};
use crate::weight::per_vote_weight;

/// Why a single vote was left out of a computation. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityIssue {
    #[error("vote {key} does not decode: {reason}")]
    Undecodable { key: String, reason: String },

    #[error("vote {key} belongs to tag {found}")]
    ForeignTag { key: String, found: TagKey },

    #[error("vote {key} is invalid: {reason}")]
    Invalid { key: String, reason: String },

    #[error("vote {key} duplicates an earlier vote for the same pair")]
    Duplicate { key: String },

    #[error("vote {key} references unknown user {user}")]
    UnknownUser { key: String, user: UserKey },
}

impl IntegrityIssue {
    pub fn log(&self, tag: TagKey) {
        warn!(tag = %tag, issue = %self, "skipping vote");
    }
}

/// Voters whose current standing carries no voting power. Their votes
/// count for nothing, though the vote records stay on file.
#[derive(Debug, Clone, Default)]
pub struct VoterStandings {
    muted: HashSet<UserKey>,
}

impl VoterStandings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mute(&mut self, voter: UserKey) {
        self.muted.insert(voter);
    }

    pub fn is_muted(&self, voter: UserKey) -> bool {
        self.muted.contains(&voter)
    }

    pub fn muted_count(&self) -> usize {
        self.muted.len()
    }
}

/// One pass over every vote in a tag: the usable votes in chronological
/// order, per-voter outgoing counts, participant count, and which votes were
/// cast while the tag was still bootstrapping.
#[derive(Debug, Clone)]
pub struct TagActivity {
    votes: Vec<Vote>,
    outgoing: HashMap<UserKey, usize>,
    bootstrap_votes: HashSet<(UserKey, UserKey)>,
    active_users: u64,
    issues: Vec<IntegrityIssue>,
}

impl TagActivity {
    pub fn scan(tag: TagKey, votes: Vec<Vote>, min_users_for_threshold: u32) -> TagActivity {
        let mut kept: Vec<Vote> = Vec::with_capacity(votes.len());
        let mut issues = Vec::new();
        let mut pairs = HashSet::new();

        for vote in votes {
            let key = vote.key();
            if vote.tag != tag {
                issues.push(IntegrityIssue::ForeignTag { key, found: vote.tag });
                continue;
            }
            if let Err(reason) = vote.validate() {
                issues.push(IntegrityIssue::Invalid { key, reason });
                continue;
            }
            if !pairs.insert((vote.voter, vote.target)) {
                issues.push(IntegrityIssue::Duplicate { key });
                continue;
            }
            kept.push(vote);
        }
        for issue in &issues {
            issue.log(tag);
        }

        kept.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.voter.cmp(&b.voter))
                .then(a.target.cmp(&b.target))
        });

        let mut voters = HashSet::new();
        let mut outgoing = HashMap::new();
        let mut bootstrap_votes = HashSet::new();
        for vote in &kept {
            if (voters.len() as u64) < u64::from(min_users_for_threshold) {
                bootstrap_votes.insert((vote.voter, vote.target));
            }
            voters.insert(vote.voter);
            *outgoing.entry(vote.voter).or_insert(0) += 1;
        }

        TagActivity {
            votes: kept,
            outgoing,
            bootstrap_votes,
            active_users: voters.len() as u64,
            issues,
        }
    }

    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    pub fn issues(&self) -> &[IntegrityIssue] {
        &self.issues
    }

    /// Distinct users with at least one usable vote in the tag.
    pub fn active_users(&self) -> u64 {
        self.active_users
    }

    pub fn phase(&self, settings: &TagSettings) -> Phase {
        Phase::of(settings, self.active_users)
    }

    pub fn outgoing(&self, voter: UserKey) -> usize {
        self.outgoing.get(&voter).copied().unwrap_or(0)
    }

    pub fn is_bootstrap_vote(&self, vote: &Vote) -> bool {
        self.bootstrap_votes.contains(&(vote.voter, vote.target))
    }

    /// How many bootstrap votes each voter has out.
    pub fn reward_counts(&self) -> HashMap<UserKey, usize> {
        let mut counts = HashMap::new();
        for (voter, _) in &self.bootstrap_votes {
            *counts.entry(*voter).or_insert(0) += 1;
        }
        counts
    }

    /// Voters whose reward count differs between `self` and `after`.
    ///
    /// The bootstrap cutoff depends on the order of every vote in the tag,
    /// so one change can move rewards of voters it never touched.
    pub fn reward_changes(&self, after: &TagActivity) -> BTreeSet<UserKey> {
        let (before, after) = (self.reward_counts(), after.reward_counts());
        before
            .keys()
            .chain(after.keys())
            .filter(|voter| before.get(*voter) != after.get(*voter))
            .copied()
            .collect()
    }

    /// Distinct voters with a vote on `target`, in key order.
    pub fn voters_of(&self, target: UserKey) -> BTreeSet<UserKey> {
        self.votes
            .iter()
            .filter(|v| v.target == target)
            .map(|v| v.voter)
            .collect()
    }

    /// Every user appearing in a usable vote, in key order.
    pub fn participants(&self) -> BTreeSet<UserKey> {
        self.votes.iter().flat_map(|v| [v.voter, v.target]).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aggregate {
    /// From votes received.
    pub basis: f64,
    /// From votes cast.
    pub rewards: f64,
}

impl Aggregate {
    /// `basis + rewards`, never below zero.
    pub fn total_effective(&self) -> f64 {
        let total = self.basis + self.rewards;
        if total > 0.0 { total } else { 0.0 }
    }
}

pub fn aggregate(
    user: UserKey,
    tag: &Tag,
    votes: &[Vote],
    now: Timestamp,
    standings: &VoterStandings,
) -> Result<Aggregate, ConfigError> {
    let activity = TagActivity::scan(tag.key, votes.to_vec(), tag.settings.min_users_for_threshold);
    aggregate_scanned(user, &tag.settings, &activity, now, standings)
}

/// Received votes feed `basis`: sign × decay(age) × the voter's per-vote
/// share. Cast votes feed `rewards`, one `vote_reward` per vote cast during
/// the bootstrap phase.
pub fn aggregate_scanned(
    user: UserKey,
    settings: &TagSettings,
    activity: &TagActivity,
    now: Timestamp,
    standings: &VoterStandings,
) -> Result<Aggregate, ConfigError> {
    let table = DecayTable::new(settings.time_periods.clone())?;
    let mut out = Aggregate::default();

    for vote in activity.votes() {
        if vote.target == user {
            if standings.is_muted(vote.voter) {
                continue;
            }
            let multiplier = table.multiplier(now.months_since(vote.created_at));
            let share = per_vote_weight(vote.weight, activity.outgoing(vote.voter));
            out.basis += vote.value.sign() * multiplier * share;
        } else if vote.voter == user && activity.is_bootstrap_vote(vote) {
            out.rewards += settings.vote_reward;
        }
    }
    Ok(out)
}
