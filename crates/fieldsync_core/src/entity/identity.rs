//! Entity identifier resolution.

use uuid::Uuid;

/// The three candidate identifiers of an entity.
///
/// Resolution order: remote key, then caller key, then temporary key. The
/// temporary key is generated once and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    temporary: String,
    caller: Option<String>,
    remote: Option<String>,
}

impl Identity {
    /// Creates an identity with only a temporary key.
    pub fn new() -> Self {
        Self {
            temporary: Uuid::new_v4().to_string(),
            caller: None,
            remote: None,
        }
    }

    /// Creates an identity with a caller-assigned key.
    pub fn with_caller(id: impl Into<String>) -> Self {
        Self {
            caller: Some(id.into()),
            ..Self::new()
        }
    }

    /// Returns the authoritative identifier.
    pub fn resolve(&self) -> &str {
        self.remote
            .as_deref()
            .or(self.caller.as_deref())
            .unwrap_or(&self.temporary)
    }

    /// Returns the temporary key.
    pub fn temporary(&self) -> &str {
        &self.temporary
    }

    /// Returns the caller-assigned key, if any.
    pub fn caller(&self) -> Option<&str> {
        self.caller.as_deref()
    }

    /// Returns the remote key, if a snapshot has been applied.
    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    /// Records the key reported by a remote snapshot.
    pub(crate) fn set_remote(&mut self, key: impl Into<String>) {
        self.remote = Some(key.into());
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_keys_are_unique() {
        assert_ne!(Identity::new().resolve(), Identity::new().resolve());
    }

    #[test]
    fn resolution_priority() {
        let mut identity = Identity::new();
        let temporary = identity.temporary().to_string();
        assert_eq!(identity.resolve(), temporary);

        let mut identity_with_caller = Identity::with_caller("alice");
        assert_eq!(identity_with_caller.resolve(), "alice");

        identity.set_remote("-Kabc");
        assert_eq!(identity.resolve(), "-Kabc");
        assert_eq!(identity.temporary(), temporary);

        identity_with_caller.set_remote("server-key");
        assert_eq!(identity_with_caller.resolve(), "server-key");
        assert_eq!(identity_with_caller.caller(), Some("alice"));
    }
}
