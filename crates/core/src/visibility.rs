//! Per-role bucket visibility.
//!
//! Every role maps to a [`VisibilityPolicy`] through one exhaustive match, so a
//! new role cannot be added without deciding where it writes and what it sees.

use crate::bucket::Bucket;
use crate::role::Role;

/// Which buckets a role writes to and reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisibilityPolicy {
    primary: Bucket,
    /// Fallback bucket searched after the primary, if the role may see it.
    secondary: Option<Bucket>,
}

impl VisibilityPolicy {
    pub const fn for_role(role: Role) -> Self {
        match role {
            Role::Viewer | Role::Contributor => Self {
                primary: Bucket::Working,
                secondary: None,
            },
            Role::Admin => Self {
                primary: Bucket::Stable,
                secondary: Some(Bucket::Working),
            },
        }
    }

    /// Bucket used for uploads and tag writes.
    pub fn primary(&self) -> Bucket {
        self.primary
    }

    /// Buckets searched by read operations, in precedence order.
    ///
    /// The primary bucket always comes first; when the same name exists in more
    /// than one bucket the earlier one shadows the later.
    pub fn search_order(&self) -> Vec<Bucket> {
        std::iter::once(self.primary).chain(self.secondary).collect()
    }

    /// Buckets a delete must touch, independent of role.
    pub fn delete_targets(&self) -> [Bucket; 2] {
        Bucket::ALL
    }
}

impl From<Role> for VisibilityPolicy {
    fn from(role: Role) -> Self {
        Self::for_role(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_admins_write_and_read_working_only() {
        for role in [Role::Viewer, Role::Contributor] {
            let policy = VisibilityPolicy::for_role(role);
            assert_eq!(policy.primary(), Bucket::Working);
            assert_eq!(policy.search_order(), vec![Bucket::Working]);
        }
    }

    #[test]
    fn test_admin_searches_stable_then_working() {
        let policy = VisibilityPolicy::for_role(Role::Admin);
        assert_eq!(policy.primary(), Bucket::Stable);
        assert_eq!(policy.search_order(), vec![Bucket::Stable, Bucket::Working]);
    }

    #[test]
    fn test_delete_targets_both_buckets_for_every_role() {
        for role in Role::ALL {
            let targets = VisibilityPolicy::from(role).delete_targets();
            assert!(targets.contains(&Bucket::Working));
            assert!(targets.contains(&Bucket::Stable));
        }
    }
}
