//! Resolved identity of the caller of a transfer.
//!
//! The authorization chain (certificate validation, VO role mapping) lives
//! outside this crate. Transfers only ever see its result: a [`Subject`].

use serde::Serialize;

/// Permission bits granted to files created by an authenticated subject.
pub const AUTHENTICATED_UMASK: u32 = 0o644;

/// Permission bits granted to files created by an anonymous subject.
pub const ANONYMOUS_UMASK: u32 = 0o666;

/// Local identity of an authenticated (or anonymous) caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Subject {
    /// Numeric user id; `None` for anonymous callers.
    pub uid: Option<u32>,
    /// Numeric group ids; the first one is the primary group.
    pub gids: Vec<u32>,
    /// Distinguished name of the grid certificate, if any.
    pub dn: Option<String>,
    /// Mapped local user name, if any.
    pub user_name: Option<String>,
    /// Home directory.
    pub home: String,
    /// Root directory the subject is confined to.
    pub root: String,
    /// Whether the subject may only read.
    pub read_only: bool,
    /// Scheduling priority assigned by the authorization chain.
    pub priority: i32,
}

impl Subject {
    /// Creates an authenticated subject with a user id and primary group.
    #[must_use]
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid: Some(uid),
            gids: vec![gid],
            home: "/".to_string(),
            root: "/".to_string(),
            ..Self::default()
        }
    }

    /// Creates a subject without any numeric identity.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            home: "/".to_string(),
            root: "/".to_string(),
            ..Self::default()
        }
    }

    /// Sets the certificate DN.
    #[must_use]
    pub fn with_dn(mut self, dn: impl Into<String>) -> Self {
        self.dn = Some(dn.into());
        self
    }

    /// Sets the mapped user name.
    #[must_use]
    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    /// Returns true if the subject carries no numeric user id.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.uid.is_none()
    }

    /// Returns the primary group id, if any.
    #[must_use]
    pub fn primary_gid(&self) -> Option<u32> {
        self.gids.first().copied()
    }

    /// Returns the name recorded as owner in billing: the DN, or else the user name.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.dn.as_deref().or(self.user_name.as_deref())
    }

    /// Returns the umask applied to files this subject creates.
    #[must_use]
    pub fn umask(&self) -> u32 {
        if self.is_anonymous() {
            ANONYMOUS_UMASK
        } else {
            AUTHENTICATED_UMASK
        }
    }

    /// Returns true if the subject is a member of `gid`.
    #[must_use]
    pub fn in_group(&self, gid: u32) -> bool {
        self.gids.contains(&gid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_subject() {
        let subject = Subject::anonymous();
        assert!(subject.is_anonymous());
        assert_eq!(subject.primary_gid(), None);
        assert_eq!(subject.umask(), 0o666);
        assert_eq!(subject.owner(), None);
    }

    #[test]
    fn test_authenticated_subject() {
        let subject = Subject::new(500, 100).with_user_name("alice");
        assert!(!subject.is_anonymous());
        assert_eq!(subject.primary_gid(), Some(100));
        assert_eq!(subject.umask(), 0o644);
        assert_eq!(subject.owner(), Some("alice"));
        assert!(subject.in_group(100));
        assert!(!subject.in_group(101));
    }

    #[test]
    fn test_owner_prefers_dn() {
        let subject = Subject::new(500, 100)
            .with_user_name("alice")
            .with_dn("/DC=org/CN=Alice");
        assert_eq!(subject.owner(), Some("/DC=org/CN=Alice"));
    }
}
