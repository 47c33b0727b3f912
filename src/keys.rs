//! Document key layout.
//!
//! The store has no secondary indexes, so keys double as compound indexes:
//! the field order below is what makes prefix scans like "every vote in a
//! tag" or "every vote one user cast in a tag" possible. ULIDs are fixed
//! width and never contain the separator, so keys sort and split cleanly.
//! Changing this layout orphans every stored vote and reputation.
//!
//! | record     | key                       |
//! |------------|---------------------------|
//! | user       | `{user}`                  |
//! | tag        | `{tag}`                   |
//! | vote       | `{tag}:{voter}:{target}`  |
//! | reputation | `{tag}:{user}`            |

use crate::error::KeyError;
use crate::types::{TagKey, UserKey};

pub const SEPARATOR: char = ':';

pub fn user_key(user: UserKey) -> String {
    user.to_string()
}

pub fn tag_key(tag: TagKey) -> String {
    tag.to_string()
}

pub fn vote_key(tag: TagKey, voter: UserKey, target: UserKey) -> String {
    format!("{}{sep}{}{sep}{}", tag, voter, target, sep = SEPARATOR)
}

pub fn reputation_key(tag: TagKey, user: UserKey) -> String {
    format!("{}{}{}", tag, SEPARATOR, user)
}

/// Prefix matching every vote (or reputation) in a tag.
pub fn tag_prefix(tag: TagKey) -> String {
    format!("{}{}", tag, SEPARATOR)
}

/// Prefix matching every vote `voter` cast in `tag`.
pub fn voter_prefix(tag: TagKey, voter: UserKey) -> String {
    format!("{}{sep}{}{sep}", tag, voter, sep = SEPARATOR)
}

pub fn handle_description(handle: &str) -> String {
    format!("handle:{}", handle)
}

pub fn user_description(user: UserKey) -> String {
    format!("user:{}", user)
}

pub fn vote_description(voter: UserKey, target: UserKey) -> String {
    format!("voter:{} target:{}", voter, target)
}

/// Description fragment selecting votes aimed at `target`.
pub fn target_filter(target: UserKey) -> String {
    format!("target:{}", target)
}

fn malformed(kind: &'static str, key: &str) -> KeyError {
    KeyError { kind, key: key.to_string() }
}

pub fn parse_user_key(key: &str) -> Result<UserKey, KeyError> {
    key.parse().map_err(|_| malformed("user", key))
}

pub fn parse_tag_key(key: &str) -> Result<TagKey, KeyError> {
    key.parse().map_err(|_| malformed("tag", key))
}

/// Returns `(tag, voter, target)`.
pub fn parse_vote_key(key: &str) -> Result<(TagKey, UserKey, UserKey), KeyError> {
    let parts: Vec<&str> = key.split(SEPARATOR).collect();
    match parts.as_slice() {
        [tag, voter, target] => Ok((
            tag.parse().map_err(|_| malformed("vote", key))?,
            voter.parse().map_err(|_| malformed("vote", key))?,
            target.parse().map_err(|_| malformed("vote", key))?,
        )),
        _ => Err(malformed("vote", key)),
    }
}

/// Returns `(tag, user)`.
pub fn parse_reputation_key(key: &str) -> Result<(TagKey, UserKey), KeyError> {
    let parts: Vec<&str> = key.split(SEPARATOR).collect();
    match parts.as_slice() {
        [tag, user] => Ok((
            tag.parse().map_err(|_| malformed("reputation", key))?,
            user.parse().map_err(|_| malformed("reputation", key))?,
        )),
        _ => Err(malformed("reputation", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_key_round_trips() {
        let (tag, voter, target) = (TagKey::generate(), UserKey::generate(), UserKey::generate());
        let key = vote_key(tag, voter, target);
        assert_eq!(parse_vote_key(&key).unwrap(), (tag, voter, target));
        assert!(key.starts_with(&tag_prefix(tag)));
        assert!(key.starts_with(&voter_prefix(tag, voter)));
    }

    #[test]
    fn reputation_key_round_trips() {
        let (tag, user) = (TagKey::generate(), UserKey::generate());
        let key = reputation_key(tag, user);
        assert_eq!(parse_reputation_key(&key).unwrap(), (tag, user));
        assert_eq!(parse_user_key(&user_key(user)).unwrap(), user);
        assert_eq!(parse_tag_key(&tag_key(tag)).unwrap(), tag);
    }

    #[test]
    fn voter_prefix_does_not_leak_into_other_voters() {
        let tag = TagKey::generate();
        let (a, b, c) = (UserKey::generate(), UserKey::generate(), UserKey::generate());
        let prefix = voter_prefix(tag, a);
        assert!(!vote_key(tag, b, c).starts_with(&prefix));
        assert!(!vote_key(TagKey::generate(), a, c).starts_with(&prefix));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        let tag = TagKey::generate();
        let user = UserKey::generate();
        assert!(parse_vote_key(&reputation_key(tag, user)).is_err());
        assert!(parse_reputation_key(&vote_key(tag, user, user)).is_err());
        assert!(parse_vote_key("a:b:c").is_err());
        let err = parse_user_key("nope").unwrap_err();
        assert_eq!(err.kind, "user");
    }

    #[test]
    fn target_filter_matches_vote_description() {
        let (voter, target) = (UserKey::generate(), UserKey::generate());
        let desc = vote_description(voter, target);
        assert!(desc.contains(&target_filter(target)));
        assert!(!desc.contains(&target_filter(voter)));
    }
}
