use serde::{Deserialize, Serialize};

use stocklot_core::AggregateId;

/// Party identifier (supplier or customer).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub AggregateId);

impl PartyId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PartyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Role a party plays towards the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyRole {
    Supplier,
    Customer,
}

/// Read-only view over the partner master data.
///
/// Partner management lives outside this system; the ledger core only needs
/// existence checks for attribution and return-order routing.
pub trait PartnerDirectory: Send + Sync {
    fn supplier_exists(&self, party_id: PartyId) -> bool;

    fn customer_exists(&self, party_id: PartyId) -> bool;
}

/// In-memory partner directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPartnerDirectory {
    parties: std::sync::RwLock<std::collections::HashMap<PartyId, PartyRole>>,
}

impl InMemoryPartnerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, party_id: PartyId, role: PartyRole) {
        if let Ok(mut parties) = self.parties.write() {
            parties.insert(party_id, role);
        }
    }

    fn has_role(&self, party_id: PartyId, role: PartyRole) -> bool {
        self.parties
            .read()
            .map(|parties| parties.get(&party_id) == Some(&role))
            .unwrap_or(false)
    }
}

impl PartnerDirectory for InMemoryPartnerDirectory {
    fn supplier_exists(&self, party_id: PartyId) -> bool {
        self.has_role(party_id, PartyRole::Supplier)
    }

    fn customer_exists(&self, party_id: PartyId) -> bool {
        self.has_role(party_id, PartyRole::Customer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_supplier_is_visible() {
        let directory = InMemoryPartnerDirectory::new();
        let supplier = PartyId::new(AggregateId::new());

        directory.register(supplier, PartyRole::Supplier);

        assert!(directory.supplier_exists(supplier));
        assert!(!directory.customer_exists(supplier));
    }

    #[test]
    fn unknown_party_is_absent() {
        let directory = InMemoryPartnerDirectory::new();
        assert!(!directory.supplier_exists(PartyId::new(AggregateId::new())));
    }
}
