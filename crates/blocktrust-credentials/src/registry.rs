use blocktrust_core::{
    ChainAddress, CoreError, Credential, CredentialEvent, CredentialRef, CredentialStateMachine,
    CredentialStatus, EngineEvent, EventBus, InvalidationCause, OwnerId,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::CredentialError;

/// Result of an invalidation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub credential: Credential,
    /// The version was already invalidated; nothing changed.
    pub already_invalidated: bool,
}

/// Versioned credential history per owner.
///
/// Versions are never deleted. All transitions for one owner are serialized
/// on that owner's map entry, and every transition names the version it
/// expects to act on; a stale version is rejected with `Conflict`.
pub struct CredentialRegistry {
    histories: DashMap<OwnerId, Vec<Credential>>,
    events: Arc<EventBus>,
}

impl CredentialRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            histories: DashMap::new(),
            events,
        }
    }

    /// Mint the next version. Only allowed when no live version exists.
    pub fn mint(&self, owner: &OwnerId, holder: ChainAddress) -> Result<Credential, CredentialError> {
        let mut history = self.histories.entry(owner.clone()).or_default();
        Self::mint_into(&mut history, owner, holder)
    }

    fn mint_into(
        history: &mut Vec<Credential>,
        owner: &OwnerId,
        holder: ChainAddress,
    ) -> Result<Credential, CredentialError> {
        if let Some(last) = history.last() {
            if !last.status.is_final() {
                return Err(CoreError::InvalidStateTransition {
                    from: last.status,
                    to: CredentialStatus::Minted,
                }
                .into());
            }
        }
        let version = history.last().map(|c| c.version + 1).unwrap_or(1);
        let credential = Credential {
            owner_id: owner.clone(),
            version,
            status: CredentialStatus::Minted,
            holder_address: holder,
            created_at: Utc::now(),
            activated_at: None,
            invalidated_at: None,
            invalidation_cause: None,
        };
        history.push(credential.clone());
        tracing::info!(owner = %owner, version, "credential minted");
        Ok(credential)
    }

    /// Activate the minted latest version.
    pub fn activate(&self, owner: &OwnerId, expected_version: u32) -> Result<Credential, CredentialError> {
        let credential = {
            let mut history = self
                .histories
                .get_mut(owner)
                .ok_or_else(|| CredentialError::CredentialNotFound(owner.to_string()))?;
            Self::activate_latest(&mut history, owner, expected_version)?
        };
        self.announce_activation(&credential);
        Ok(credential)
    }

    fn activate_latest(
        history: &mut [Credential],
        owner: &OwnerId,
        expected_version: u32,
    ) -> Result<Credential, CredentialError> {
        let latest = history
            .last_mut()
            .ok_or_else(|| CredentialError::CredentialNotFound(owner.to_string()))?;
        if latest.version != expected_version {
            return Err(CoreError::Conflict {
                owner: owner.to_string(),
                expected: expected_version,
                current: latest.version,
            }
            .into());
        }
        latest.status = CredentialStateMachine::transition(latest.status, CredentialEvent::Activate)?;
        latest.activated_at = Some(Utc::now());
        Ok(latest.clone())
    }

    fn announce_activation(&self, credential: &Credential) {
        tracing::info!(
            owner = %credential.owner_id,
            version = credential.version,
            holder = %credential.holder_address,
            "credential activated"
        );
        self.events.publish(EngineEvent::CredentialActivated {
            credential_ref: credential.credential_ref(),
        });
    }

    /// Handle a confirmed identity verification.
    ///
    /// Returns the active version unchanged when one exists, activates a
    /// pending minted version, and otherwise mints and activates a new one.
    pub fn on_identity_verified(
        &self,
        owner: &OwnerId,
        holder: ChainAddress,
    ) -> Result<Credential, CredentialError> {
        let credential = {
            let mut history = self.histories.entry(owner.clone()).or_default();
            if let Some(active) = history.last().filter(|c| c.is_usable()).cloned() {
                tracing::debug!(owner = %owner, version = active.version, "identity re-verified while active");
                return Ok(active);
            }
            if history.last().map(|c| c.status) != Some(CredentialStatus::Minted) {
                Self::mint_into(&mut history, owner, holder)?;
            }
            let version = history.last().map(|c| c.version).unwrap_or(1);
            Self::activate_latest(&mut history, owner, version)?
        };
        self.announce_activation(&credential);
        Ok(credential)
    }

    /// Invalidate `expected_version` of the owner's credential.
    pub fn invalidate(
        &self,
        owner: &OwnerId,
        expected_version: u32,
        cause: InvalidationCause,
    ) -> Result<Invalidation, CredentialError> {
        let credential = {
            let mut history = self
                .histories
                .get_mut(owner)
                .filter(|h| !h.is_empty())
                .ok_or_else(|| CredentialError::CredentialNotFound(owner.to_string()))?;
            let current = history.last().map(|c| c.version).unwrap_or(0);

            let target = history
                .iter_mut()
                .find(|c| c.version == expected_version)
                .ok_or_else(|| CoreError::Conflict {
                    owner: owner.to_string(),
                    expected: expected_version,
                    current,
                })?;

            if target.status == CredentialStatus::Invalidated {
                return Ok(Invalidation {
                    credential: target.clone(),
                    already_invalidated: true,
                });
            }
            if target.version != current {
                return Err(CoreError::Conflict {
                    owner: owner.to_string(),
                    expected: expected_version,
                    current,
                }
                .into());
            }

            target.status =
                CredentialStateMachine::transition(target.status, CredentialEvent::Invalidate(cause))?;
            target.invalidated_at = Some(Utc::now());
            target.invalidation_cause = Some(cause);
            target.clone()
        };

        tracing::info!(
            owner = %owner,
            version = credential.version,
            cause = %cause,
            "credential invalidated"
        );
        self.events.publish(EngineEvent::CredentialInvalidated {
            credential_ref: credential.credential_ref(),
            cause,
        });
        Ok(Invalidation {
            credential,
            already_invalidated: false,
        })
    }

    /// Latest version, whatever its status.
    pub fn current(&self, owner: &OwnerId) -> Option<Credential> {
        self.histories.get(owner).and_then(|h| h.last().cloned())
    }

    pub fn active(&self, owner: &OwnerId) -> Option<Credential> {
        self.current(owner).filter(|c| c.is_usable())
    }

    /// Every version, oldest first.
    pub fn history(&self, owner: &OwnerId) -> Vec<Credential> {
        self.histories
            .get(owner)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    pub fn get(&self, credential_ref: &CredentialRef) -> Option<Credential> {
        self.histories
            .get(&credential_ref.owner_id)?
            .iter()
            .find(|c| c.version == credential_ref.version)
            .cloned()
    }

    /// Find the version whose on-chain commitment matches.
    pub fn find_by_commitment(&self, commitment: &[u8; 32]) -> Option<Credential> {
        self.histories.iter().find_map(|h| {
            h.value()
                .iter()
                .find(|c| c.credential_ref().commitment() == *commitment)
                .cloned()
        })
    }

    /// The referenced version, provided it can back a new attestation now.
    pub fn require_usable(&self, credential_ref: &CredentialRef) -> Result<Credential, CredentialError> {
        let credential = self
            .get(credential_ref)
            .ok_or_else(|| CredentialError::CredentialNotFound(credential_ref.to_string()))?;
        if !credential.is_usable() {
            return Err(CoreError::CredentialInvalidated(credential_ref.to_string()).into());
        }
        Ok(credential)
    }

    pub fn was_active_at(&self, credential_ref: &CredentialRef, at: DateTime<Utc>) -> bool {
        self.get(credential_ref)
            .map(|c| c.was_active_at(at))
            .unwrap_or(false)
    }

    pub fn owner_count(&self) -> usize {
        self.histories.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocktrust_core::ErrorCode;

    fn setup() -> (CredentialRegistry, OwnerId, ChainAddress) {
        (
            CredentialRegistry::new(Arc::new(EventBus::default())),
            OwnerId::new("alice").unwrap(),
            ChainAddress::parse("0x00000000000000000000000000000000000000aa").unwrap(),
        )
    }

    #[test]
    fn test_verification_mints_and_activates() {
        let (reg, owner, holder) = setup();
        let c = reg.on_identity_verified(&owner, holder).unwrap();
        assert_eq!(c.version, 1);
        assert_eq!(c.status, CredentialStatus::Active);
        assert!(c.activated_at.is_some());
        assert_eq!(reg.active(&owner), Some(c));
    }

    #[test]
    fn test_reverification_while_active_is_idempotent() {
        let (reg, owner, holder) = setup();
        let first = reg.on_identity_verified(&owner, holder.clone()).unwrap();
        let second = reg.on_identity_verified(&owner, holder).unwrap();
        assert_eq!(first, second);
        assert_eq!(reg.history(&owner).len(), 1);
    }

    #[test]
    fn test_invalidate_then_reverify_mints_new_version() {
        let (reg, owner, holder) = setup();
        reg.on_identity_verified(&owner, holder.clone()).unwrap();
        let inv = reg.invalidate(&owner, 1, InvalidationCause::User).unwrap();
        assert!(!inv.already_invalidated);
        assert_eq!(inv.credential.invalidation_cause, Some(InvalidationCause::User));
        assert!(reg.active(&owner).is_none());

        let v2 = reg.on_identity_verified(&owner, holder).unwrap();
        assert_eq!(v2.version, 2);
        let history = reg.history(&owner);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, CredentialStatus::Invalidated);
        assert_eq!(history[1].status, CredentialStatus::Active);
    }

    #[test]
    fn test_invalidate_twice_is_noop() {
        let (reg, owner, holder) = setup();
        reg.on_identity_verified(&owner, holder).unwrap();
        let first = reg.invalidate(&owner, 1, InvalidationCause::Failsafe).unwrap();
        let second = reg.invalidate(&owner, 1, InvalidationCause::User).unwrap();
        assert!(second.already_invalidated);
        assert_eq!(second.credential, first.credential);
        assert_eq!(second.credential.invalidation_cause, Some(InvalidationCause::Failsafe));
    }

    #[test]
    fn test_stale_version_conflicts() {
        let (reg, owner, holder) = setup();
        reg.on_identity_verified(&owner, holder).unwrap();
        let err = reg.invalidate(&owner, 7, InvalidationCause::User).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
    }

    #[test]
    fn test_activate_stale_version_conflicts() {
        let (reg, owner, holder) = setup();
        let minted = reg.mint(&owner, holder).unwrap();
        assert_eq!(minted.status, CredentialStatus::Minted);
        let err = reg.activate(&owner, 2).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
        assert_eq!(reg.activate(&owner, 1).unwrap().status, CredentialStatus::Active);
    }

    #[test]
    fn test_minted_can_be_invalidated() {
        let (reg, owner, holder) = setup();
        reg.mint(&owner, holder).unwrap();
        let inv = reg.invalidate(&owner, 1, InvalidationCause::User).unwrap();
        assert_eq!(inv.credential.status, CredentialStatus::Invalidated);
        assert!(inv.credential.activated_at.is_none());
    }

    #[test]
    fn test_cannot_mint_over_live_version() {
        let (reg, owner, holder) = setup();
        reg.on_identity_verified(&owner, holder.clone()).unwrap();
        assert_eq!(reg.mint(&owner, holder).unwrap_err().code(), ErrorCode::Conflict);
    }

    #[test]
    fn test_invalidate_unknown_owner() {
        let (reg, _, _) = setup();
        let err = reg
            .invalidate(&OwnerId::new("nobody").unwrap(), 1, InvalidationCause::User)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_require_usable_after_invalidation() {
        let (reg, owner, holder) = setup();
        let c = reg.on_identity_verified(&owner, holder).unwrap();
        assert!(reg.require_usable(&c.credential_ref()).is_ok());
        reg.invalidate(&owner, 1, InvalidationCause::User).unwrap();
        assert_eq!(
            reg.require_usable(&c.credential_ref()).unwrap_err().code(),
            ErrorCode::CredentialInvalidated
        );
    }

    #[test]
    fn test_was_active_at_survives_invalidation() {
        let (reg, owner, holder) = setup();
        let c = reg.on_identity_verified(&owner, holder).unwrap();
        let signed_at = Utc::now();
        reg.invalidate(&owner, 1, InvalidationCause::Failsafe).unwrap();
        assert!(reg.was_active_at(&c.credential_ref(), signed_at));
        assert!(!reg.was_active_at(&c.credential_ref(), Utc::now() + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_find_by_commitment() {
        let (reg, owner, holder) = setup();
        let c = reg.on_identity_verified(&owner, holder).unwrap();
        let found = reg.find_by_commitment(&c.credential_ref().commitment()).unwrap();
        assert_eq!(found.version, 1);
        assert!(reg.find_by_commitment(&[0u8; 32]).is_none());
    }

    #[test]
    fn test_events_published() {
        let events = Arc::new(EventBus::default());
        let mut sub = events.subscribe().unwrap();
        let reg = CredentialRegistry::new(events);
        let owner = OwnerId::new("carol").unwrap();
        reg.on_identity_verified(
            &owner,
            ChainAddress::parse("0x00000000000000000000000000000000000000cc").unwrap(),
        )
        .unwrap();
        reg.invalidate(&owner, 1, InvalidationCause::Failsafe).unwrap();

        assert!(matches!(sub.try_recv(), Some(EngineEvent::CredentialActivated { .. })));
        assert!(matches!(
            sub.try_recv(),
            Some(EngineEvent::CredentialInvalidated {
                cause: InvalidationCause::Failsafe,
                ..
            })
        ));
    }

    #[test]
    fn test_concurrent_invalidations_apply_once() {
        let (reg, owner, holder) = setup();
        reg.on_identity_verified(&owner, holder).unwrap();
        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| reg.invalidate(&owner, 1, InvalidationCause::User).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results.iter().filter(|r| !r.already_invalidated).count(), 1);
    }
}
