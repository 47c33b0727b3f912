use tracing::{debug, info, warn};

use crate::aggregate::TagActivity;
use crate::engine::ReputationEngine;
use crate::error::EngineError;
use crate::gate;
use crate::keys;
use crate::records::{TagSettings, Vote, VoteValue};
use crate::store::{self, Collection};
use crate::types::{TagKey, UserKey};

impl ReputationEngine {
    /// Cast or replace `voter`'s vote on `target` in `tag`.
    ///
    /// The vote records the voter's influence as it stands once this vote's
    /// own participation reward is counted. The voter is recomputed right
    /// away; the targets are only marked stale.
    pub fn cast_vote(
        &self,
        voter: UserKey,
        target: UserKey,
        tag: TagKey,
        value: VoteValue,
    ) -> Result<Vote, EngineError> {
        if voter == target {
            return Err(EngineError::InvalidVote("users cannot vote on themselves".into()));
        }
        self.require_user(voter)?;
        self.require_user(target)?;
        let tag_doc = self.load_tag(tag)?;
        let settings = &tag_doc.record.settings;

        let standing = self.get_or_refresh_reputation(voter, tag)?;
        let key = keys::vote_key(tag, voter, target);
        let existing_version = self
            .store()
            .get(Collection::Votes, &key)?
            .map_or(0, |doc| doc.version);

        let (votes, _) = self.load_votes(tag)?;
        let before = TagActivity::scan(tag, votes.clone(), settings.min_users_for_threshold);
        let was_rewarded = before
            .votes()
            .iter()
            .any(|v| v.voter == voter && v.target == target && before.is_bootstrap_vote(v));

        let mut vote = Vote {
            voter,
            target,
            tag,
            value,
            weight: 0.0,
            created_at: self.now(),
        };
        let mut prospective: Vec<Vote> = votes
            .into_iter()
            .filter(|v| !(v.voter == voter && v.target == target))
            .collect();
        prospective.push(vote.clone());
        let after = TagActivity::scan(tag, prospective, settings.min_users_for_threshold);
        let rewarded = after.is_bootstrap_vote(&vote);

        let reward_delta = settings.vote_reward * (f64::from(u8::from(rewarded)) - f64::from(u8::from(was_rewarded)));
        let total = standing.reputation_basis + standing.reputation_rewards + reward_delta;
        vote.weight = gate::evaluate(total, settings, after.active_users()).vote_weight;

        store::save(self.store(), &vote, existing_version)?;
        info!(
            voter = %voter,
            target = %target,
            tag = %tag,
            value = ?value,
            weight = vote.weight,
            replaced = existing_version > 0,
            "vote cast"
        );

        self.settle(tag, voter, target, settings, &before, &after)?;
        Ok(vote)
    }

    /// Remove `voter`'s vote on `target`. Returns false if there was none.
    pub fn retract_vote(&self, voter: UserKey, target: UserKey, tag: TagKey) -> Result<bool, EngineError> {
        let key = keys::vote_key(tag, voter, target);
        let doc = match self.store().get(Collection::Votes, &key)? {
            Some(doc) => doc,
            None => return Ok(false),
        };
        let tag_doc = self.load_tag(tag)?;
        let settings = &tag_doc.record.settings;
        let (votes, _) = self.load_votes(tag)?;
        let before = TagActivity::scan(tag, votes, settings.min_users_for_threshold);

        self.store().delete(Collection::Votes, &key, doc.version)?;
        info!(voter = %voter, target = %target, tag = %tag, "vote retracted");

        let remaining: Vec<Vote> = before
            .votes()
            .iter()
            .filter(|v| !(v.voter == voter && v.target == target))
            .cloned()
            .collect();
        let after = TagActivity::scan(tag, remaining, settings.min_users_for_threshold);

        self.settle(tag, voter, target, settings, &before, &after)?;
        Ok(true)
    }

    /// Mark everything the committed vote change touched as stale, then
    /// bring the voter up to date.
    ///
    /// Runs every invalidation even when some fail; the failures come back
    /// together as `InvalidationIncomplete`.
    fn settle(
        &self,
        tag: TagKey,
        voter: UserKey,
        target: UserKey,
        settings: &TagSettings,
        before: &TagActivity,
        after: &TagActivity,
    ) -> Result<(), EngineError> {
        let mut marked = self.invalidate_each(tag, self.affected_by_vote(tag, voter, target)?);

        // the bootstrap cutoff can move rewards of voters this vote never touched
        let shifted = before.reward_changes(after);
        if !shifted.is_empty() {
            debug!(tag = %tag, voters = shifted.len(), "bootstrap rewards moved");
            marked.merge(self.invalidate_each(tag, shifted));
        }

        // voting power of every participant depends on the phase
        let (from, to) = (before.phase(settings), after.phase(settings));
        if from != to {
            let whole_tag = self.invalidate_each(tag, self.cached_users(tag)?);
            info!(tag = %tag, from = ?from, to = ?to, invalidated = whole_tag.marked, "tag changed phase");
            marked.merge(whole_tag);
        }

        // the voter is already marked stale, so a failure here only defers
        // the recompute to the next read
        if let Err(e) = self.refresh(voter, tag) {
            warn!(voter = %voter, tag = %tag, error = %e, "voter refresh after vote change failed");
        }
        marked.into_result(tag).map(|_| ())
    }

    /// Every vote `voter` currently has out in `tag`.
    pub fn votes_by(&self, voter: UserKey, tag: TagKey) -> Result<Vec<Vote>, EngineError> {
        let query = store::KeyQuery::prefix(keys::voter_prefix(tag, voter));
        let mut out = Vec::new();
        for doc in self.store().list(Collection::Votes, &query)? {
            out.push(store::decode::<Vote>(&doc)?);
        }
        Ok(out)
    }

    /// Every vote aimed at `target` in `tag`, found by description.
    pub fn votes_for(&self, target: UserKey, tag: TagKey) -> Result<Vec<Vote>, EngineError> {
        let query = store::KeyQuery::prefix(keys::tag_prefix(tag)).with_description(keys::target_filter(target));
        let mut out = Vec::new();
        for doc in self.store().list(Collection::Votes, &query)? {
            out.push(store::decode::<Vote>(&doc)?);
        }
        Ok(out)
    }
}
