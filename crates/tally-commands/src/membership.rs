//! Role lookup for (actor, scope) pairs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use tally_types::{ActorId, Role, ScopeId, TallyError};

/// Answers "what role does this actor hold in this scope?".
///
/// `Ok(None)` means the actor is not a member. The host application
/// implements this over its own persistence.
#[async_trait]
pub trait MembershipLookup: Send + Sync {
    async fn lookup_role(&self, actor: &ActorId, scope: &ScopeId)
        -> Result<Option<Role>, TallyError>;
}

/// In-memory membership table.
#[derive(Debug, Default)]
pub struct StaticMembership {
    roles: RwLock<HashMap<(ScopeId, ActorId), Role>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`grant`](Self::grant).
    #[must_use]
    pub fn with_member(
        self,
        scope: impl Into<ScopeId>,
        actor: impl Into<ActorId>,
        role: Role,
    ) -> Self {
        self.grant(scope, actor, role);
        self
    }

    /// Set an actor's role in a scope, replacing any previous role.
    pub fn grant(&self, scope: impl Into<ScopeId>, actor: impl Into<ActorId>, role: Role) {
        self.roles.write().insert((scope.into(), actor.into()), role);
    }

    /// Remove an actor from a scope. Returns the role they held.
    pub fn revoke(&self, scope: &ScopeId, actor: &ActorId) -> Option<Role> {
        self.roles.write().remove(&(scope.clone(), actor.clone()))
    }
}

#[async_trait]
impl MembershipLookup for StaticMembership {
    async fn lookup_role(
        &self,
        actor: &ActorId,
        scope: &ScopeId,
    ) -> Result<Option<Role>, TallyError> {
        Ok(self
            .roles
            .read()
            .get(&(scope.clone(), actor.clone()))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_grant_and_revoke() {
        let members = StaticMembership::new().with_member("room-1", "alice", Role::Admin);
        let alice = ActorId::new("alice");
        let room = ScopeId::new("room-1");

        assert_eq!(members.lookup_role(&alice, &room).await.unwrap(), Some(Role::Admin));
        assert_eq!(
            members.lookup_role(&alice, &ScopeId::new("room-2")).await.unwrap(),
            None
        );

        members.grant("room-1", "alice", Role::Owner);
        assert_eq!(members.lookup_role(&alice, &room).await.unwrap(), Some(Role::Owner));

        assert_eq!(members.revoke(&room, &alice), Some(Role::Owner));
        assert_eq!(members.lookup_role(&alice, &room).await.unwrap(), None);
    }
}
