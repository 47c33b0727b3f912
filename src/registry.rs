//! User and tag bookkeeping around the engine.
//!
//! Handle uniqueness is checked by a description scan before the write; the
//! store has no unique index, so two racing registrations of one handle can
//! both succeed.

use tracing::{info, warn};

use crate::error::EngineError;
use crate::keys;
use crate::records::{normalize_handle, Record, Tag, TagSettings, User};
use crate::store::{self, Collection, DocumentStore, KeyQuery, Versioned};
use crate::types::{TagKey, UserKey};

fn find_by_handle<R: Record>(
    store: &dyn DocumentStore,
    handle: &str,
    handle_of: impl Fn(&R) -> &str,
) -> Result<Option<Versioned<R>>, EngineError> {
    let handle = normalize_handle(handle);
    let query = KeyQuery::all().with_description(keys::handle_description(&handle));
    for doc in store.list(R::COLLECTION, &query)? {
        match store::decode::<R>(&doc) {
            Ok(record) if handle_of(&record) == handle => {
                return Ok(Some(Versioned { record, version: doc.version }));
            }
            Ok(_) => {}
            Err(e) => warn!(collection = %R::COLLECTION, error = %e, "skipping unreadable document"),
        }
    }
    Ok(None)
}

pub fn find_user_by_handle(store: &dyn DocumentStore, handle: &str) -> Result<Option<Versioned<User>>, EngineError> {
    find_by_handle::<User>(store, handle, |u| u.handle.as_str())
}

pub fn find_tag_by_handle(store: &dyn DocumentStore, handle: &str) -> Result<Option<Versioned<Tag>>, EngineError> {
    find_by_handle::<Tag>(store, handle, |t| t.handle.as_str())
}

pub fn register_user(
    store: &dyn DocumentStore,
    handle: &str,
    display_name: &str,
    avatar: Option<String>,
) -> Result<User, EngineError> {
    let handle = normalize_handle(handle);
    if find_user_by_handle(store, &handle)?.is_some() {
        return Err(EngineError::HandleTaken(handle));
    }
    let user = User {
        key: UserKey::generate(),
        handle,
        display_name: display_name.to_string(),
        avatar,
    };
    user.validate().map_err(EngineError::InvalidHandle)?;
    store::save(store, &user, 0)?;
    info!(user = %user.key, handle = %user.handle, "user registered");
    Ok(user)
}

pub fn create_tag(
    store: &dyn DocumentStore,
    creator: UserKey,
    handle: &str,
    description: &str,
    settings: TagSettings,
) -> Result<Tag, EngineError> {
    settings.validate()?;
    if store.get(Collection::Users, &keys::user_key(creator))?.is_none() {
        return Err(EngineError::UserNotFound(creator));
    }
    let handle = normalize_handle(handle);
    if find_tag_by_handle(store, &handle)?.is_some() {
        return Err(EngineError::HandleTaken(handle));
    }
    let tag = Tag {
        key: TagKey::generate(),
        creator,
        handle,
        description: description.to_string(),
        settings,
    };
    tag.validate().map_err(EngineError::InvalidHandle)?;
    store::save(store, &tag, 0)?;
    info!(tag = %tag.key, handle = %tag.handle, "tag created");
    Ok(tag)
}

/// Replace a tag's settings. Only its creator may. Bumping the tag's version
/// makes every cached reputation in the tag stale.
pub fn update_tag_settings(
    store: &dyn DocumentStore,
    tag: TagKey,
    editor: UserKey,
    settings: TagSettings,
) -> Result<Tag, EngineError> {
    settings.validate()?;
    let current = match store::load::<Tag>(store, &keys::tag_key(tag))? {
        None => return Err(EngineError::TagNotFound(tag)),
        Some(loaded) => loaded?,
    };
    if current.record.creator != editor {
        return Err(EngineError::NotTagCreator { user: editor, tag });
    }
    let updated = Tag { settings, ..current.record };
    store::save(store, &updated, current.version)?;
    info!(tag = %tag, "tag settings updated");
    Ok(updated)
}
