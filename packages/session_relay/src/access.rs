//! Session lookup and status mutation, split by privilege.
//!
//! The agent backend may touch any session by id; everyone else is confined
//! to the team of their authenticated account. The two paths are separate
//! types so the cross-team path cannot be reached without a [`BackendGrant`].

use std::future::Future;

use relay_auth::{BackendGrant, Trust};

use crate::auth::PeerIdentity;
use crate::error::{RelayError, RelayResult};
use crate::models::{RoomId, Session};
use crate::repository::RelayRepository;
use crate::status::SessionStatus;

pub trait SessionAccess {
    /// Load a session visible to this caller, or `NotFound`.
    fn resolve(&self, id: &RoomId) -> impl Future<Output = RelayResult<Session>> + Send;

    /// Persist a new status for a session visible to this caller.
    fn set_status(
        &self,
        id: &RoomId,
        status: SessionStatus,
    ) -> impl Future<Output = RelayResult<()>> + Send;
}

/// Unscoped access, reserved for backend-trusted connections.
#[derive(Clone)]
pub struct TrustedSessionAccess {
    repository: RelayRepository,
    _grant: BackendGrant,
}

impl TrustedSessionAccess {
    pub fn new(repository: RelayRepository, grant: BackendGrant) -> Self {
        Self {
            repository,
            _grant: grant,
        }
    }
}

impl SessionAccess for TrustedSessionAccess {
    async fn resolve(&self, id: &RoomId) -> RelayResult<Session> {
        self.repository
            .get_session_unscoped(id.as_str())
            .await?
            .ok_or_else(|| RelayError::NotFound(id.to_string()))
    }

    async fn set_status(&self, id: &RoomId, status: SessionStatus) -> RelayResult<()> {
        if self
            .repository
            .set_session_status_unscoped(id.as_str(), status)
            .await?
        {
            Ok(())
        } else {
            Err(RelayError::NotFound(id.to_string()))
        }
    }
}

/// Access confined to one team.
#[derive(Clone)]
pub struct ScopedSessionAccess {
    repository: RelayRepository,
    team_id: String,
}

impl ScopedSessionAccess {
    pub fn new(repository: RelayRepository, team_id: impl Into<String>) -> Self {
        Self {
            repository,
            team_id: team_id.into(),
        }
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }
}

impl SessionAccess for ScopedSessionAccess {
    async fn resolve(&self, id: &RoomId) -> RelayResult<Session> {
        self.repository
            .get_session_for_team(&self.team_id, id.as_str())
            .await?
            .ok_or_else(|| RelayError::NotFound(id.to_string()))
    }

    async fn set_status(&self, id: &RoomId, status: SessionStatus) -> RelayResult<()> {
        if self
            .repository
            .set_session_status_for_team(&self.team_id, id.as_str(), status)
            .await?
        {
            Ok(())
        } else {
            Err(RelayError::NotFound(id.to_string()))
        }
    }
}

/// The access path a connection was granted when it attached.
#[derive(Clone)]
pub enum SessionScope {
    Trusted(TrustedSessionAccess),
    Scoped(ScopedSessionAccess),
    /// Anonymous peers see no sessions at all.
    Nothing,
}

impl SessionScope {
    pub fn for_peer(repository: &RelayRepository, identity: &PeerIdentity) -> Self {
        match identity.trust {
            Trust::Backend(grant) => {
                Self::Trusted(TrustedSessionAccess::new(repository.clone(), grant))
            }
            Trust::User => match identity.team_id() {
                Some(team) => Self::Scoped(ScopedSessionAccess::new(repository.clone(), team)),
                None => Self::Nothing,
            },
            Trust::Anonymous => Self::Nothing,
        }
    }

    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Trusted(_))
    }
}

impl SessionAccess for SessionScope {
    async fn resolve(&self, id: &RoomId) -> RelayResult<Session> {
        match self {
            Self::Trusted(access) => access.resolve(id).await,
            Self::Scoped(access) => access.resolve(id).await,
            Self::Nothing => Err(RelayError::NotFound(id.to_string())),
        }
    }

    async fn set_status(&self, id: &RoomId, status: SessionStatus) -> RelayResult<()> {
        match self {
            Self::Trusted(access) => access.set_status(id, status).await,
            Self::Scoped(access) => access.set_status(id, status).await,
            Self::Nothing => Err(RelayError::NotFound(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers::{self, TEAM_A, TEAM_B};
    use relay_auth::{BackendSecret, classify};

    const SID: &str = "aaaaaaaaaaaaaaaaaaaaaaaa";

    fn room() -> RoomId {
        RoomId::parse(SID).unwrap()
    }

    fn grant() -> BackendGrant {
        let secret = BackendSecret::new("backend-secret");
        classify(Some(b"backend-secret"), &secret).unwrap()
    }

    #[tokio::test]
    async fn trusted_resolves_any_team() {
        let repo = test_helpers::test_repository().await;
        test_helpers::seed_session(&repo, SID, TEAM_B, SessionStatus::Waiting).await;

        let access = TrustedSessionAccess::new(repo, grant());
        let session = access.resolve(&room()).await.unwrap();
        assert_eq!(session.team_id, TEAM_B);
    }

    #[tokio::test]
    async fn scoped_hides_foreign_sessions() {
        let repo = test_helpers::test_repository().await;
        test_helpers::seed_session(&repo, SID, TEAM_B, SessionStatus::Waiting).await;

        let access = ScopedSessionAccess::new(repo.clone(), TEAM_A);
        assert!(matches!(
            access.resolve(&room()).await,
            Err(RelayError::NotFound(_))
        ));
        assert!(matches!(
            access.set_status(&room(), SessionStatus::Terminated).await,
            Err(RelayError::NotFound(_))
        ));

        let session = repo.get_session_unscoped(SID).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Waiting);
    }

    #[tokio::test]
    async fn scoped_updates_own_sessions() {
        let repo = test_helpers::test_repository().await;
        test_helpers::seed_session(&repo, SID, TEAM_A, SessionStatus::Waiting).await;

        let access = ScopedSessionAccess::new(repo.clone(), TEAM_A);
        access
            .set_status(&room(), SessionStatus::Running)
            .await
            .unwrap();
        assert_eq!(
            access.resolve(&room()).await.unwrap().status,
            SessionStatus::Running
        );
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let repo = test_helpers::test_repository().await;
        let access = TrustedSessionAccess::new(repo, grant());
        assert!(matches!(
            access.resolve(&room()).await,
            Err(RelayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn scope_follows_peer_trust() {
        let repo = test_helpers::test_repository().await;
        test_helpers::seed_session(&repo, SID, TEAM_A, SessionStatus::Waiting).await;
        let account = test_helpers::seed_account(&repo, "acc-1", "Alice", Some(TEAM_A)).await;

        let backend = SessionScope::for_peer(&repo, &PeerIdentity::backend(grant()));
        assert!(backend.is_trusted());
        assert!(backend.resolve(&room()).await.is_ok());

        let user = SessionScope::for_peer(&repo, &PeerIdentity::user(account));
        assert!(matches!(user, SessionScope::Scoped(ref s) if s.team_id() == TEAM_A));
        assert!(user.resolve(&room()).await.is_ok());

        let anonymous = SessionScope::for_peer(&repo, &PeerIdentity::anonymous());
        assert!(matches!(
            anonymous.resolve(&room()).await,
            Err(RelayError::NotFound(_))
        ));
    }
}
