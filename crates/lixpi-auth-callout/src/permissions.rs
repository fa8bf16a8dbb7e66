//! Per-user permission resolution.
//!
//! Permissions come from the same manifest services register their
//! subscriptions from: each entry may carry `pub`/`sub` allow lists
//! templated with `{userId}`.

use lixpi_nats::{AllowList, SubjectPermissions, SubjectSubscription, USER_ID_PLACEHOLDER};
use serde::{Deserialize, Serialize};

/// Private reply namespace every connection may use.
pub const INBOX_WILDCARD: &str = "_INBOX.>";

/// Concrete publish / subscribe allow lists for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(rename = "pub")]
    pub publish: AllowList,
    #[serde(rename = "sub")]
    pub subscribe: AllowList,
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self {
            publish: AllowList::new([INBOX_WILDCARD]),
            subscribe: AllowList::new([INBOX_WILDCARD]),
        }
    }
}

/// An entry of a standalone permissions manifest file.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionEntry {
    pub subject: String,
    #[serde(default)]
    pub permissions: Option<SubjectPermissions>,
}

/// Resolve the permission set for `user_id`.
///
/// Starts from the inbox wildcard, then appends every templated subject of
/// every entry, in manifest order, with all `{userId}` placeholders
/// replaced. Duplicates are kept.
pub fn resolve_permissions<'a, I>(user_id: &str, manifest: I) -> PermissionSet
where
    I: IntoIterator<Item = &'a SubjectPermissions>,
{
    let mut resolved = PermissionSet::default();
    let substitute = |subject: &String| subject.replace(USER_ID_PLACEHOLDER, user_id);

    for permissions in manifest {
        if let Some(publish) = &permissions.publish {
            resolved
                .publish
                .allow
                .extend(publish.allow.iter().map(substitute));
        }
        if let Some(subscribe) = &permissions.subscribe {
            resolved
                .subscribe
                .allow
                .extend(subscribe.allow.iter().map(substitute));
        }
    }
    resolved
}

/// Permission templates declared by a subscription manifest.
pub fn templates_from_subscriptions(subscriptions: &[SubjectSubscription]) -> Vec<SubjectPermissions> {
    subscriptions
        .iter()
        .filter_map(|entry| entry.permissions.clone())
        .collect()
}

/// Permission templates from a standalone manifest.
pub fn templates_from_entries(entries: Vec<PermissionEntry>) -> Vec<SubjectPermissions> {
    entries
        .into_iter()
        .filter_map(|entry| entry.permissions)
        .collect()
}
