use crate::error::Result;
use crate::generic::object::{AttestationId, Role};
use crate::generic::service::RoleQuerier;
use async_trait::async_trait;
use ethers::types::Address;
use std::collections::HashMap;

/// A fixed role table standing in for on-chain lookups.
#[derive(Clone, Debug, Default)]
pub struct RoleTable {
    roles: HashMap<Address, Vec<Role>>,
    badgeholder_attestations: HashMap<Address, AttestationId>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, address: Address, role: Role) -> Self {
        let roles = self.roles.entry(address).or_default();
        if !roles.contains(&role) {
            roles.push(role);
        }
        self
    }

    /// Makes `address` a badgeholder through `attestation`.
    pub fn with_badgeholder(mut self, address: Address, attestation: AttestationId) -> Self {
        self.badgeholder_attestations.insert(address, attestation);
        self.with_role(address, Role::Badgeholder)
    }

    /// Roles `address` holds, `Role::None` included, in index order.
    pub fn held(&self, address: Address) -> Vec<Role> {
        let listed = self.roles.get(&address).map(Vec::as_slice).unwrap_or_default();
        Role::ALL
            .into_iter()
            .filter(|role| *role == Role::None || listed.contains(role))
            .collect()
    }
}

#[async_trait]
impl RoleQuerier for RoleTable {
    async fn is_role(&self, address: Address, role: Role) -> Result<bool> {
        Ok(self.held(address).contains(&role))
    }

    async fn badgeholder_attestation(&self, address: Address) -> Result<Option<AttestationId>> {
        Ok(self.badgeholder_attestations.get(&address).copied())
    }
}
