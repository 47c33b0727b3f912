use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::aggregate::{aggregate_scanned, IntegrityIssue, TagActivity, VoterStandings};
use crate::config::EngineConfig;
use crate::error::{ConfigError, EngineError, StoreError};
use crate::gate::{self, Phase};
use crate::keys;
use crate::records::{Reputation, Tag, Vote};
use crate::store::{self, Collection, DocumentStore, KeyQuery, Versioned};
use crate::types::{Clock, TagKey, Timestamp, UserKey, NANOS_PER_SEC};

/// Reputation cache controller.
/// - sole writer of Reputation documents
/// - recomputes a (user, tag) pair when its cached record is stale
/// - persists with a version check, retrying a bounded number of times
///
/// Stateless between calls; every decision is made from what the store
/// holds at that moment, so one engine can serve many threads.
pub struct ReputationEngine {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

/// Outcome of one `refresh`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalcReport {
    pub reputation: Reputation,
    pub version: u64,
    /// False when the cached record was fresh and returned as is.
    pub recomputed: bool,
    pub attempts: u32,
    /// Votes left out for data-integrity reasons.
    pub skipped_votes: usize,
}

/// Outcome of marking a batch of reputations stale.
#[derive(Debug, Default)]
pub(crate) struct Invalidated {
    pub marked: usize,
    pub failed: Vec<UserKey>,
}

impl Invalidated {
    pub fn merge(&mut self, other: Invalidated) {
        self.marked += other.marked;
        self.failed.extend(other.failed);
    }

    pub fn into_result(self, tag: TagKey) -> Result<usize, EngineError> {
        if self.failed.is_empty() {
            Ok(self.marked)
        } else {
            Err(EngineError::InvalidationIncomplete { tag, users: self.failed })
        }
    }
}

pub(crate) enum Cached {
    Absent,
    /// Present but undecodable; rewritten on the next recompute.
    Unreadable { version: u64 },
    Present(Versioned<Reputation>),
}

impl Cached {
    fn version(&self) -> u64 {
        match self {
            Cached::Absent => 0,
            Cached::Unreadable { version } => *version,
            Cached::Present(v) => v.version,
        }
    }
}

/// Whether the user's targets currently count its votes: they re-gate the
/// cached total, and treat a missing or unreadable record as unmuted.
fn power_as_seen_by_targets(cached: &Cached, tag: &Tag, fresh: &Reputation) -> bool {
    match cached {
        Cached::Present(prev) => {
            gate::evaluate(prev.record.reputation_total_effective, &tag.settings, fresh.active_users).has_voting_power
        }
        Cached::Absent | Cached::Unreadable { .. } => true,
    }
}

impl ReputationEngine {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self { store, clock, config }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// The entry point for everything outside the engine. Idempotent.
    pub fn get_or_refresh_reputation(&self, user: UserKey, tag: TagKey) -> Result<Reputation, EngineError> {
        Ok(self.refresh(user, tag)?.reputation)
    }

    pub fn refresh(&self, user: UserKey, tag: TagKey) -> Result<RecalcReport, EngineError> {
        if self.config.verify_user_refs {
            self.require_user(user)?;
        }
        let key = keys::reputation_key(tag, user);
        let attempts = self.config.max_attempts();

        for attempt in 1..=attempts {
            let tag_doc = self.load_tag(tag)?;
            let cached = self.load_cached(&key)?;
            let now = self.clock.now();

            if let Cached::Present(current) = &cached {
                if self.is_fresh(&current.record, tag_doc.version, now) {
                    return Ok(RecalcReport {
                        reputation: current.record.clone(),
                        version: current.version,
                        recomputed: false,
                        attempts: attempt,
                        skipped_votes: 0,
                    });
                }
            }

            let (reputation, skipped_votes) = self.compute(user, &tag_doc, now)?;
            match store::save(self.store(), &reputation, cached.version()) {
                Ok(version) => {
                    if power_as_seen_by_targets(&cached, &tag_doc.record, &reputation) != reputation.has_voting_power {
                        self.invalidate_targets_of(user, tag);
                    }
                    debug!(
                        user = %user,
                        tag = %tag,
                        version,
                        total = reputation.reputation_total_effective,
                        has_voting_power = reputation.has_voting_power,
                        skipped_votes,
                        "reputation recomputed"
                    );
                    return Ok(RecalcReport {
                        reputation,
                        version,
                        recomputed: true,
                        attempts: attempt,
                        skipped_votes,
                    });
                }
                Err(StoreError::VersionConflict { expected, found, .. }) => {
                    warn!(user = %user, tag = %tag, attempt, expected, found, "reputation write conflicted");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(user = %user, tag = %tag, attempts, "giving up on reputation write");
        Err(EngineError::VersionConflict { user, tag, attempts })
    }

    /// Mark a cached record stale. Returns false when there was nothing
    /// fresh to invalidate.
    pub fn invalidate(&self, user: UserKey, tag: TagKey) -> Result<bool, EngineError> {
        let key = keys::reputation_key(tag, user);
        let attempts = self.config.max_attempts();

        for _ in 0..attempts {
            let mut current = match self.load_cached(&key)? {
                Cached::Present(current) => current,
                Cached::Absent | Cached::Unreadable { .. } => return Ok(false),
            };
            if current.record.stale {
                return Ok(false);
            }
            current.record.stale = true;
            match store::save(self.store(), &current.record, current.version) {
                Ok(_) => {
                    debug!(user = %user, tag = %tag, "reputation invalidated");
                    return Ok(true);
                }
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::VersionConflict { user, tag, attempts })
    }

    /// A vote from `voter` to `target` was created, changed or removed.
    ///
    /// The target's basis and the voter's rewards change directly; every
    /// other target of the voter changes too, because the voter's reputation
    /// is now split over a different number of votes.
    pub fn notify_vote_changed(&self, tag: TagKey, voter: UserKey, target: UserKey) -> Result<(), EngineError> {
        let affected = self.affected_by_vote(tag, voter, target)?;
        let marked = self.invalidate_each(tag, affected);
        marked.into_result(tag).map(|_| ())
    }

    /// Mark every cached reputation in a tag stale. Returns how many were.
    pub fn invalidate_tag(&self, tag: TagKey) -> Result<usize, EngineError> {
        let users = self.cached_users(tag)?;
        self.invalidate_each(tag, users).into_result(tag)
    }

    /// Invalidate each user in turn. A failure is logged and collected; it
    /// never stops the remaining users from being marked.
    pub(crate) fn invalidate_each(&self, tag: TagKey, users: impl IntoIterator<Item = UserKey>) -> Invalidated {
        let mut out = Invalidated::default();
        for user in users {
            match self.invalidate(user, tag) {
                Ok(true) => out.marked += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(user = %user, tag = %tag, error = %e, "could not mark reputation stale");
                    out.failed.push(user);
                }
            }
        }
        out
    }

    /// The target, the voter, and every other target of the voter.
    pub(crate) fn affected_by_vote(
        &self,
        tag: TagKey,
        voter: UserKey,
        target: UserKey,
    ) -> Result<BTreeSet<UserKey>, EngineError> {
        let mut affected: BTreeSet<UserKey> = [target, voter].into_iter().collect();
        affected.extend(self.targets_of(voter, tag)?);
        Ok(affected)
    }

    /// Users with a cached reputation in the tag.
    pub(crate) fn cached_users(&self, tag: TagKey) -> Result<Vec<UserKey>, EngineError> {
        let query = KeyQuery::prefix(keys::tag_prefix(tag));
        let mut users = Vec::new();
        for doc in self.store.list(Collection::Reputations, &query)? {
            match keys::parse_reputation_key(&doc.key) {
                Ok((_, user)) => users.push(user),
                Err(e) => warn!(tag = %tag, error = %e, "unparseable reputation key"),
            }
        }
        Ok(users)
    }

    fn targets_of(&self, voter: UserKey, tag: TagKey) -> Result<Vec<UserKey>, EngineError> {
        let query = KeyQuery::prefix(keys::voter_prefix(tag, voter));
        let mut targets = Vec::new();
        for doc in self.store.list(Collection::Votes, &query)? {
            match keys::parse_vote_key(&doc.key) {
                Ok((_, _, target)) => targets.push(target),
                Err(e) => warn!(tag = %tag, error = %e, "unparseable vote key"),
            }
        }
        Ok(targets)
    }

    // Targets mute or unmute this voter based on its cached record, so they
    // go stale when its voting power flips. Failures are only logged: the
    // record itself is already written.
    fn invalidate_targets_of(&self, voter: UserKey, tag: TagKey) {
        let targets = match self.targets_of(voter, tag) {
            Ok(targets) => targets,
            Err(e) => {
                warn!(user = %voter, tag = %tag, error = %e, "could not list targets after power change");
                return;
            }
        };
        let marked = self.invalidate_each(tag, targets);
        debug!(user = %voter, tag = %tag, marked = marked.marked, "voting power changed");
    }

    /// Recompute every participant of a tag.
    pub fn refresh_tag(&self, tag: TagKey) -> Result<Vec<RecalcReport>, EngineError> {
        let tag_doc = self.load_tag(tag)?;
        let (votes, _) = self.load_votes(tag)?;
        let activity = TagActivity::scan(tag, votes, tag_doc.record.settings.min_users_for_threshold);

        let mut reports = Vec::new();
        for user in activity.participants() {
            match self.refresh(user, tag) {
                Ok(report) => reports.push(report),
                Err(EngineError::UserNotFound(missing)) => {
                    warn!(tag = %tag, user = %missing, "participant has no user record");
                }
                Err(e) => return Err(e),
            }
        }
        info!(tag = %tag, refreshed = reports.len(), "tag refreshed");
        Ok(reports)
    }

    pub fn phase(&self, tag: TagKey) -> Result<Phase, EngineError> {
        let tag_doc = self.load_tag(tag)?;
        let (votes, _) = self.load_votes(tag)?;
        let activity = TagActivity::scan(tag, votes, tag_doc.record.settings.min_users_for_threshold);
        Ok(activity.phase(&tag_doc.record.settings))
    }

    pub(crate) fn require_user(&self, user: UserKey) -> Result<(), EngineError> {
        match self.store.get(Collection::Users, &keys::user_key(user))? {
            Some(_) => Ok(()),
            None => Err(EngineError::UserNotFound(user)),
        }
    }

    /// Load and check a tag. Anything wrong with it is a configuration error.
    pub(crate) fn load_tag(&self, tag: TagKey) -> Result<Versioned<Tag>, EngineError> {
        let loaded = match store::load::<Tag>(self.store(), &keys::tag_key(tag))? {
            None => return Err(EngineError::TagNotFound(tag)),
            Some(loaded) => loaded,
        };
        let tag_doc = loaded.map_err(|e| EngineError::Configuration {
            tag,
            source: ConfigError::Malformed(e.to_string()),
        })?;
        tag_doc
            .record
            .settings
            .validate()
            .map_err(|source| EngineError::Configuration { tag, source })?;
        Ok(tag_doc)
    }

    pub(crate) fn load_cached(&self, key: &str) -> Result<Cached, EngineError> {
        let doc = match self.store.get(Collection::Reputations, key)? {
            Some(doc) => doc,
            None => return Ok(Cached::Absent),
        };
        match store::decode::<Reputation>(&doc) {
            Ok(record) => Ok(Cached::Present(Versioned { record, version: doc.version })),
            Err(e) => {
                warn!(key, error = %e, "cached reputation unreadable, recomputing");
                Ok(Cached::Unreadable { version: doc.version })
            }
        }
    }

    /// Every decodable vote in the tag, plus what was skipped.
    pub(crate) fn load_votes(&self, tag: TagKey) -> Result<(Vec<Vote>, Vec<IntegrityIssue>), EngineError> {
        let docs = self.store.list(Collection::Votes, &KeyQuery::prefix(keys::tag_prefix(tag)))?;
        let mut votes = Vec::with_capacity(docs.len());
        let mut issues = Vec::new();
        for doc in &docs {
            match store::decode::<Vote>(doc) {
                Ok(vote) => votes.push(vote),
                Err(e) => {
                    let issue = IntegrityIssue::Undecodable { key: doc.key.clone(), reason: e.to_string() };
                    issue.log(tag);
                    issues.push(issue);
                }
            }
        }
        Ok((votes, issues))
    }

    fn is_fresh(&self, record: &Reputation, tag_version: u64, now: Timestamp) -> bool {
        if record.stale || record.tag_version != tag_version {
            return false;
        }
        if self.config.max_age_secs == 0 {
            return true;
        }
        let age = now.0.saturating_sub(record.last_calculation.0);
        age <= self.config.max_age_secs.saturating_mul(NANOS_PER_SEC)
    }

    fn compute(
        &self,
        user: UserKey,
        tag_doc: &Versioned<Tag>,
        now: Timestamp,
    ) -> Result<(Reputation, usize), EngineError> {
        let tag = &tag_doc.record;
        let (votes, mut issues) = self.load_votes(tag.key)?;
        let votes = if self.config.verify_user_refs {
            self.drop_unknown_users(tag.key, votes, &mut issues)?
        } else {
            votes
        };

        let activity = TagActivity::scan(tag.key, votes, tag.settings.min_users_for_threshold);
        let standings = match activity.phase(&tag.settings) {
            Phase::Bootstrap => VoterStandings::new(),
            Phase::Steady => self.standings_of_voters(user, tag, &activity)?,
        };

        let totals = aggregate_scanned(user, &tag.settings, &activity, now, &standings)
            .map_err(|source| EngineError::Configuration { tag: tag.key, source })?;
        let total = totals.total_effective();
        let power = gate::evaluate(total, &tag.settings, activity.active_users());

        let reputation = Reputation {
            user,
            tag: tag.key,
            reputation_basis: totals.basis,
            reputation_rewards: totals.rewards,
            reputation_total_effective: total,
            last_calculation: now,
            vote_weight: power.vote_weight,
            has_voting_power: power.has_voting_power,
            stale: false,
            tag_version: tag_doc.version,
            active_users: activity.active_users(),
        };
        Ok((reputation, issues.len() + activity.issues().len()))
    }

    /// Voters of `user` whose last known total falls short under the tag's
    /// current rules. Reads cached records only; never recurses into a
    /// recompute of the voter.
    fn standings_of_voters(
        &self,
        user: UserKey,
        tag: &Tag,
        activity: &TagActivity,
    ) -> Result<VoterStandings, EngineError> {
        let mut standings = VoterStandings::new();
        for voter in activity.voters_of(user) {
            let key = keys::reputation_key(tag.key, voter);
            if let Cached::Present(cached) = self.load_cached(&key)? {
                let power = gate::evaluate(
                    cached.record.reputation_total_effective,
                    &tag.settings,
                    activity.active_users(),
                );
                if !power.has_voting_power {
                    standings.mute(voter);
                }
            }
        }
        if standings.muted_count() > 0 {
            debug!(user = %user, tag = %tag.key, muted = standings.muted_count(), "voters without power");
        }
        Ok(standings)
    }

    fn drop_unknown_users(
        &self,
        tag: TagKey,
        votes: Vec<Vote>,
        issues: &mut Vec<IntegrityIssue>,
    ) -> Result<Vec<Vote>, EngineError> {
        let mut known: HashMap<UserKey, bool> = HashMap::new();
        let mut kept = Vec::with_capacity(votes.len());
        'votes: for vote in votes {
            for user in [vote.voter, vote.target] {
                let exists = match known.get(&user) {
                    Some(exists) => *exists,
                    None => {
                        let exists = self.store.get(Collection::Users, &keys::user_key(user))?.is_some();
                        known.insert(user, exists);
                        exists
                    }
                };
                if !exists {
                    let issue = IntegrityIssue::UnknownUser { key: keys::vote_key(tag, vote.voter, vote.target), user };
                    issue.log(tag);
                    issues.push(issue);
                    continue 'votes;
                }
            }
            kept.push(vote);
        }
        Ok(kept)
    }
}
