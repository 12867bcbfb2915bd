//! Group Directory.
//!
//! Groups are created implicitly: the first message addressed to a group
//! tag creates it, and a client becomes a member by posting to it. Being
//! on the receiving end of a group message does not confer membership.

use std::fmt;

use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::types::Identity;

/// Directory of group tags and the identities that have posted to them.
pub struct GroupDirectory {
    /// Group tag to members in the order they joined
    groups: DashMap<String, Vec<Identity>>,
}

impl GroupDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    /// Add `identity` to `group` unless it is already a member.
    ///
    /// Returns true if the identity was newly added.
    #[instrument(skip(self))]
    pub fn ensure_member(&self, group: &str, identity: &str) -> bool {
        let mut members = self.groups.entry(group.to_string()).or_default();
        if members.iter().any(|member| member == identity) {
            return false;
        }
        members.push(identity.to_string());
        debug!(member_count = members.len(), "Added group member");
        true
    }

    /// Current members of `group`, in join order.
    ///
    /// Empty if the group has never been addressed.
    pub fn members(&self, group: &str) -> Vec<Identity> {
        self.groups
            .get(group)
            .map(|members| members.value().clone())
            .unwrap_or_default()
    }

    /// Number of known groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// All known group tags, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.groups.iter().map(|g| g.key().clone()).collect();
        groups.sort();
        groups
    }
}

impl Default for GroupDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GroupDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupDirectory")
            .field("group_count", &self.groups.len())
            .finish()
    }
}
