use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use courier_core::ids::{ConversationId, ProjectId, UserId};

use crate::error::DispatchError;
use crate::shared_store::SharedStore;

/// The authoritative membership source, i.e. the persistence layer.
/// Consulted on cache miss; a positive answer heals the cache.
#[async_trait]
pub trait MembershipAuthority: Send + Sync {
    async fn is_conversation_participant(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<bool, DispatchError>;

    async fn is_project_member(
        &self,
        project: &ProjectId,
        user: &UserId,
    ) -> Result<bool, DispatchError>;
}

/// Cross-process cache of active conversation participants and project
/// members. Entries never expire on their own; only explicit remove
/// invalidates them.
pub struct ParticipantCoordinator {
    store: Arc<dyn SharedStore>,
    authority: Arc<dyn MembershipAuthority>,
}

impl ParticipantCoordinator {
    pub fn new(store: Arc<dyn SharedStore>, authority: Arc<dyn MembershipAuthority>) -> Self {
        Self { store, authority }
    }

    fn conversation_key(conversation: &ConversationId) -> String {
        format!("ws:conversation:{conversation}:participants")
    }

    fn project_key(project: &ProjectId) -> String {
        format!("ws:project:{project}:members")
    }

    pub async fn add(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<(), DispatchError> {
        self.store
            .set_add(&Self::conversation_key(conversation), user.as_str())
            .await?;
        Ok(())
    }

    pub async fn remove(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<(), DispatchError> {
        self.store
            .set_remove(&Self::conversation_key(conversation), user.as_str())
            .await?;
        Ok(())
    }

    /// The cached participant set. Fan-out paths iterate this; they do not
    /// consult the authority.
    pub async fn members(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<UserId>, DispatchError> {
        let members = self
            .store
            .set_members(&Self::conversation_key(conversation))
            .await?;
        Ok(members.into_iter().map(UserId::from_raw).collect())
    }

    /// Membership check with authoritative fallback. A cache read failure is
    /// treated as a miss so an unreachable cache cannot deny a legitimate
    /// participant.
    pub async fn is_participant(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<bool, DispatchError> {
        let key = Self::conversation_key(conversation);
        match self.store.set_contains(&key, user.as_str()).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "participant cache unavailable, falling back");
            }
        }

        if self
            .authority
            .is_conversation_participant(conversation, user)
            .await?
        {
            // Write-through on positive fallback; a failed heal is benign.
            if let Err(e) = self.store.set_add(&key, user.as_str()).await {
                warn!(key = %key, error = %e, "participant cache heal failed");
            } else {
                debug!(key = %key, user_id = %user, "participant cache healed");
            }
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn is_project_member(
        &self,
        project: &ProjectId,
        user: &UserId,
    ) -> Result<bool, DispatchError> {
        let key = Self::project_key(project);
        match self.store.set_contains(&key, user.as_str()).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "project member cache unavailable, falling back");
            }
        }

        if self.authority.is_project_member(project, user).await? {
            if let Err(e) = self.store.set_add(&key, user.as_str()).await {
                warn!(key = %key, error = %e, "project member cache heal failed");
            }
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::shared_store::InMemorySharedStore;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Authority stub over explicit membership sets, counting lookups.
    pub(crate) struct StubAuthority {
        pub conversations: Mutex<HashSet<(String, String)>>,
        pub projects: Mutex<HashSet<(String, String)>>,
        pub lookups: AtomicUsize,
    }

    impl StubAuthority {
        pub fn new() -> Self {
            Self {
                conversations: Mutex::new(HashSet::new()),
                projects: Mutex::new(HashSet::new()),
                lookups: AtomicUsize::new(0),
            }
        }

        pub fn grant(&self, conversation: &ConversationId, user: &UserId) {
            self.conversations
                .lock()
                .insert((conversation.to_string(), user.to_string()));
        }

        pub fn grant_project(&self, project: &ProjectId, user: &UserId) {
            self.projects
                .lock()
                .insert((project.to_string(), user.to_string()));
        }

        pub fn lookup_count(&self) -> usize {
            self.lookups.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl MembershipAuthority for StubAuthority {
        async fn is_conversation_participant(
            &self,
            conversation: &ConversationId,
            user: &UserId,
        ) -> Result<bool, DispatchError> {
            self.lookups.fetch_add(1, Ordering::Relaxed);
            Ok(self
                .conversations
                .lock()
                .contains(&(conversation.to_string(), user.to_string())))
        }

        async fn is_project_member(
            &self,
            project: &ProjectId,
            user: &UserId,
        ) -> Result<bool, DispatchError> {
            self.lookups.fetch_add(1, Ordering::Relaxed);
            Ok(self
                .projects
                .lock()
                .contains(&(project.to_string(), user.to_string())))
        }
    }

    fn setup() -> (ParticipantCoordinator, Arc<StubAuthority>) {
        let authority = Arc::new(StubAuthority::new());
        let coordinator = ParticipantCoordinator::new(
            Arc::new(InMemorySharedStore::new()),
            authority.clone(),
        );
        (coordinator, authority)
    }

    #[tokio::test]
    async fn cached_members_answer_without_authority() {
        let (coordinator, authority) = setup();
        let conv = ConversationId::from_raw("conv_1");
        let user = UserId::from_raw("user_1");

        coordinator.add(&conv, &user).await.unwrap();
        assert!(coordinator.is_participant(&conv, &user).await.unwrap());
        assert_eq!(authority.lookup_count(), 0);
    }

    #[tokio::test]
    async fn cache_miss_falls_back_and_heals() {
        let (coordinator, authority) = setup();
        let conv = ConversationId::from_raw("conv_1");
        let user = UserId::from_raw("user_1");
        authority.grant(&conv, &user);

        assert!(coordinator.is_participant(&conv, &user).await.unwrap());
        assert_eq!(authority.lookup_count(), 1);

        // Healed: the second check is served from the cache.
        assert!(coordinator.is_participant(&conv, &user).await.unwrap());
        assert_eq!(authority.lookup_count(), 1);
    }

    #[tokio::test]
    async fn non_member_stays_denied() {
        let (coordinator, authority) = setup();
        let conv = ConversationId::from_raw("conv_99");
        let user = UserId::from_raw("user_1");

        assert!(!coordinator.is_participant(&conv, &user).await.unwrap());
        // Negative results are not cached; each check re-consults.
        assert!(!coordinator.is_participant(&conv, &user).await.unwrap());
        assert_eq!(authority.lookup_count(), 2);
    }

    #[tokio::test]
    async fn remove_invalidates_cache_entry() {
        let (coordinator, _authority) = setup();
        let conv = ConversationId::from_raw("conv_1");
        let user = UserId::from_raw("user_1");

        coordinator.add(&conv, &user).await.unwrap();
        coordinator.remove(&conv, &user).await.unwrap();
        assert!(!coordinator.is_participant(&conv, &user).await.unwrap());
    }

    #[tokio::test]
    async fn members_lists_cached_set_only() {
        let (coordinator, authority) = setup();
        let conv = ConversationId::from_raw("conv_1");
        authority.grant(&conv, &UserId::from_raw("user_uncached"));

        coordinator
            .add(&conv, &UserId::from_raw("user_a"))
            .await
            .unwrap();
        coordinator
            .add(&conv, &UserId::from_raw("user_b"))
            .await
            .unwrap();

        let mut members: Vec<String> = coordinator
            .members(&conv)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        members.sort();
        assert_eq!(members, vec!["user_a", "user_b"]);
    }

    #[tokio::test]
    async fn project_membership_heals_too() {
        let (coordinator, authority) = setup();
        let project = ProjectId::from_raw("proj_1");
        let user = UserId::from_raw("user_1");
        authority.grant_project(&project, &user);

        assert!(coordinator
            .is_project_member(&project, &user)
            .await
            .unwrap());
        assert!(coordinator
            .is_project_member(&project, &user)
            .await
            .unwrap());
        assert_eq!(authority.lookup_count(), 1);
    }
}
