use serde::de::DeserializeOwned;
use serde::{Serialize, Deserialize};

use crate::decay;
use crate::error::ConfigError;
use crate::keys;
use crate::store::Collection;
use crate::types::{TagKey, Timestamp, UserKey};

/// A typed payload living in one store collection.
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn key(&self) -> String;

    /// Secondary string the store can substring-match on.
    fn description(&self) -> String;

    /// Schema checks serde cannot express.
    fn validate(&self) -> Result<(), String>;
}

pub fn normalize_handle(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn check_handle(handle: &str) -> Result<(), String> {
    if handle.is_empty() {
        return Err("empty handle".into());
    }
    if handle != normalize_handle(handle) {
        return Err(format!("handle {:?} is not normalized", handle));
    }
    if handle.chars().any(char::is_whitespace) {
        return Err(format!("handle {:?} contains whitespace", handle));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub key: UserKey,
    pub handle: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Record for User {
    const COLLECTION: Collection = Collection::Users;

    fn key(&self) -> String {
        keys::user_key(self.key)
    }

    fn description(&self) -> String {
        keys::handle_description(&self.handle)
    }

    fn validate(&self) -> Result<(), String> {
        check_handle(&self.handle)
    }
}

/// One decay band: votes younger than the running total of durations up to
/// and including this band are scaled by `multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePeriod {
    pub duration_months: u32,
    pub multiplier: f64,
}

impl TimePeriod {
    pub fn new(duration_months: u32, multiplier: f64) -> Self {
        Self { duration_months, multiplier }
    }
}

/// The creator-editable part of a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSettings {
    pub time_periods: Vec<TimePeriod>,
    pub reputation_threshold: f64,
    pub vote_reward: f64,
    pub min_users_for_threshold: u32,
}

impl Default for TagSettings {
    fn default() -> Self {
        Self {
            time_periods: vec![
                TimePeriod::new(1, 1.5),
                TimePeriod::new(2, 1.2),
                TimePeriod::new(999, 0.25),
            ],
            reputation_threshold: 10.0,
            vote_reward: 0.1,
            min_users_for_threshold: 5,
        }
    }
}

impl TagSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        decay::validate_periods(&self.time_periods)?;
        for (field, value) in [
            ("reputation_threshold", self.reputation_threshold),
            ("vote_reward", self.vote_reward),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidSetting { field, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub key: TagKey,
    pub creator: UserKey,
    pub handle: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub settings: TagSettings,
}

impl Record for Tag {
    const COLLECTION: Collection = Collection::Tags;

    fn key(&self) -> String {
        keys::tag_key(self.key)
    }

    fn description(&self) -> String {
        keys::handle_description(&self.handle)
    }

    // Settings are checked separately so that a broken tag surfaces as a
    // configuration error rather than a decode failure.
    fn validate(&self) -> Result<(), String> {
        check_handle(&self.handle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum VoteValue {
    Up,
    Down,
}

impl VoteValue {
    pub fn sign(self) -> f64 {
        match self {
            VoteValue::Up => 1.0,
            VoteValue::Down => -1.0,
        }
    }
}

impl TryFrom<i8> for VoteValue {
    type Error = String;

    fn try_from(v: i8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(VoteValue::Up),
            -1 => Ok(VoteValue::Down),
            other => Err(format!("vote value must be +1 or -1, got {}", other)),
        }
    }
}

impl From<VoteValue> for i8 {
    fn from(v: VoteValue) -> i8 {
        match v {
            VoteValue::Up => 1,
            VoteValue::Down => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: UserKey,
    pub target: UserKey,
    pub tag: TagKey,
    pub value: VoteValue,
    /// Voter's influence snapshot taken when the vote was cast.
    pub weight: f64,
    pub created_at: Timestamp,
}

impl Record for Vote {
    const COLLECTION: Collection = Collection::Votes;

    fn key(&self) -> String {
        keys::vote_key(self.tag, self.voter, self.target)
    }

    fn description(&self) -> String {
        keys::vote_description(self.voter, self.target)
    }

    fn validate(&self) -> Result<(), String> {
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(format!("weight {} is not a non-negative number", self.weight));
        }
        if self.voter == self.target {
            return Err("self-vote".into());
        }
        Ok(())
    }
}

/// Cached per-(user, tag) aggregate. Only the recalculation controller
/// writes these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reputation {
    pub user: UserKey,
    pub tag: TagKey,
    pub reputation_basis: f64,
    pub reputation_rewards: f64,
    pub reputation_total_effective: f64,
    pub last_calculation: Timestamp,
    pub vote_weight: f64,
    pub has_voting_power: bool,
    #[serde(default)]
    pub stale: bool,
    #[serde(default)]
    pub tag_version: u64,
    #[serde(default)]
    pub active_users: u64,
}

impl Record for Reputation {
    const COLLECTION: Collection = Collection::Reputations;

    fn key(&self) -> String {
        keys::reputation_key(self.tag, self.user)
    }

    fn description(&self) -> String {
        keys::user_description(self.user)
    }

    fn validate(&self) -> Result<(), String> {
        let numbers = [
            self.reputation_basis,
            self.reputation_rewards,
            self.reputation_total_effective,
            self.vote_weight,
        ];
        if numbers.iter().any(|n| !n.is_finite()) {
            return Err("non-finite score".into());
        }
        if self.reputation_total_effective < 0.0 || self.vote_weight < 0.0 {
            return Err("negative effective score".into());
        }
        Ok(())
    }
}
