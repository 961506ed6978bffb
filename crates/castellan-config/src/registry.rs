//! Streaming credential registry backed by the configuration store.
//!
//! # Design
//! - List edits are planned here as pure functions over the current user list
//!   and committed through [`ConfigStore::apply_structured`], so every change
//!   gets the same backup, validation and atomic replace as any other patch.
//! - Built-in identities may have their secret and label edited and their
//!   permissions narrowed. Deleting them, renaming them, changing their IP
//!   list, or adding permissions is refused with `ProtectedUser`.
//! - The public-access entry and the test-stream viewer are switched on and
//!   off as a whole through their own toggles. Switching off the test-stream
//!   viewer is the one way that built-in leaves the list.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::model::StructuredPatch;
use crate::store::{CommitReceipt, ConfigStore};
use crate::users::{BuiltIn, StreamingUser, UserSelector, validate_user, validate_user_list};

/// Whether anonymous clients can reach the media server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousAccess {
    /// Every path is open to anonymous clients.
    pub public_access: bool,
    /// Anonymous clients may watch the test stream.
    pub test_stream_viewer: bool,
}

/// CRUD over the streaming users stored in the live document.
#[derive(Clone)]
pub struct StreamingUserRegistry {
    store: Arc<ConfigStore>,
}

impl StreamingUserRegistry {
    /// Registry over `store`.
    #[must_use]
    pub const fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    /// Current streaming users, in document order.
    ///
    /// # Errors
    ///
    /// Returns `CorruptConfig` when the live document cannot be parsed.
    pub async fn enumerate(&self) -> ConfigResult<Vec<StreamingUser>> {
        self.store.read().await?.users()
    }

    /// Append a user.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` or `DuplicateUser` when the record is rejected.
    pub async fn add(&self, user: StreamingUser) -> ConfigResult<CommitReceipt> {
        self.store
            .apply_structured(StructuredPatch::AddUser { user })
            .await
    }

    /// Replace the user matched by `selector`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUser`, `ProtectedUser`, or a validation error.
    pub async fn edit(
        &self,
        selector: UserSelector,
        user: StreamingUser,
    ) -> ConfigResult<CommitReceipt> {
        self.store
            .apply_structured(StructuredPatch::EditUser { selector, user })
            .await
    }

    /// Current state of the two anonymous-access toggles.
    ///
    /// # Errors
    ///
    /// Returns `CorruptConfig` when the live document cannot be parsed.
    pub async fn access(&self) -> ConfigResult<AnonymousAccess> {
        let users = self.enumerate().await?;
        Ok(AnonymousAccess {
            public_access: users.iter().any(StreamingUser::is_public_access),
            test_stream_viewer: users
                .iter()
                .any(|user| user.built_in() == Some(BuiltIn::TestStreamViewer)),
        })
    }

    /// Open or close anonymous access to every path.
    ///
    /// # Errors
    ///
    /// Returns a validation error when another group already carries the
    /// public label.
    pub async fn set_public_access(&self, enabled: bool) -> ConfigResult<CommitReceipt> {
        self.store
            .apply_structured(StructuredPatch::PublicAccess { enabled })
            .await
    }

    /// Add or remove the hidden test-stream viewer.
    ///
    /// # Errors
    ///
    /// Returns `CorruptConfig` or a commit failure from the store.
    pub async fn set_test_stream_viewer(&self, enabled: bool) -> ConfigResult<CommitReceipt> {
        self.store
            .apply_structured(StructuredPatch::TestStreamViewer { enabled })
            .await
    }

    /// Remove the user matched by `selector`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUser`, or `ProtectedUser` for built-in identities.
    pub async fn delete(&self, selector: UserSelector) -> ConfigResult<CommitReceipt> {
        self.store
            .apply_structured(StructuredPatch::DeleteUser { selector })
            .await
    }
}

pub(crate) fn plan_add(
    mut users: Vec<StreamingUser>,
    user: StreamingUser,
) -> ConfigResult<Vec<StreamingUser>> {
    validate_user(&user)?;
    let selector = user.selector();
    if users.iter().any(|existing| selector.matches(existing)) {
        return Err(ConfigError::DuplicateUser { name: user.name });
    }
    users.push(user);
    validate_user_list(&users)?;
    Ok(users)
}

pub(crate) fn plan_edit(
    mut users: Vec<StreamingUser>,
    selector: &UserSelector,
    user: StreamingUser,
) -> ConfigResult<Vec<StreamingUser>> {
    let index = find(&users, selector)?;
    guard_built_in_edit(&users[index], &user)?;
    validate_user(&user)?;
    users[index] = user;
    validate_user_list(&users)?;
    Ok(users)
}

pub(crate) fn plan_delete(
    mut users: Vec<StreamingUser>,
    selector: &UserSelector,
) -> ConfigResult<Vec<StreamingUser>> {
    let index = find(&users, selector)?;
    if users[index].built_in().is_some() {
        return Err(ConfigError::ProtectedUser {
            name: users[index].name.clone(),
            reason: "built-in users cannot be deleted",
        });
    }
    users.remove(index);
    Ok(users)
}

pub(crate) fn plan_public_access(
    mut users: Vec<StreamingUser>,
    enabled: bool,
) -> ConfigResult<Vec<StreamingUser>> {
    if enabled {
        if !users.iter().any(StreamingUser::is_public_access) {
            users.push(StreamingUser::public_access());
        }
    } else {
        users.retain(|user| !user.is_public_access());
    }
    validate_user_list(&users)?;
    Ok(users)
}

pub(crate) fn plan_test_stream_viewer(
    mut users: Vec<StreamingUser>,
    enabled: bool,
) -> ConfigResult<Vec<StreamingUser>> {
    let is_viewer = |user: &StreamingUser| user.built_in() == Some(BuiltIn::TestStreamViewer);
    if enabled {
        if !users.iter().any(is_viewer) {
            users.push(StreamingUser::test_stream_viewer());
        }
    } else {
        users.retain(|user| !is_viewer(user));
    }
    validate_user_list(&users)?;
    Ok(users)
}

fn find(users: &[StreamingUser], selector: &UserSelector) -> ConfigResult<usize> {
    users
        .iter()
        .position(|user| selector.matches(user))
        .ok_or_else(|| ConfigError::UnknownUser {
            name: selector.name.clone(),
        })
}

fn guard_built_in_edit(current: &StreamingUser, next: &StreamingUser) -> ConfigResult<()> {
    if current.built_in().is_none() {
        return Ok(());
    }
    let protected = |reason| {
        Err(ConfigError::ProtectedUser {
            name: current.name.clone(),
            reason,
        })
    };
    if next.name != current.name {
        return protected("built-in users cannot be renamed");
    }
    let mut current_ips = current.ips.clone();
    let mut next_ips = next.ips.clone();
    current_ips.sort_unstable();
    next_ips.sort_unstable();
    if current_ips != next_ips {
        return protected("built-in IP restrictions cannot change");
    }
    if !next
        .permissions
        .iter()
        .all(|perm| current.permissions.contains(perm))
    {
        return protected("built-in permissions cannot be widened");
    }
    Ok(())
}
