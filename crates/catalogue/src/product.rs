use serde::{Deserialize, Serialize};

use stocklot_core::{AggregateId, DomainError, DomainResult};
use stocklot_partners::PartyId;

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Human-facing product code (e.g. "SKU-TV55"). Used as the leading segment
/// of minted serial codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductCode(String);

impl ProductCode {
    pub fn new(code: impl Into<String>) -> DomainResult<Self> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(DomainError::validation("product code cannot be empty"));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ProductCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit of measure for a product's quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitOfMeasure(String);

impl UnitOfMeasure {
    pub fn new(unit: impl Into<String>) -> DomainResult<Self> {
        let unit = unit.into();
        if unit.trim().is_empty() {
            return Err(DomainError::validation("unit of measure cannot be empty"));
        }
        Ok(Self(unit))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Catalogue view of a product.
///
/// `serial_tracked` is fixed at definition time: whether a product carries
/// per-unit serial identity is a catalogue attribute, not something
/// inferred from the presence of serial rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product_id: ProductId,
    pub code: ProductCode,
    pub name: String,
    pub unit: UnitOfMeasure,
    pub serial_tracked: bool,
    /// Supplier that damage found during stock counts is attributed to.
    pub default_supplier: Option<PartyId>,
}

/// Read-only view over the product catalogue.
///
/// The catalogue itself (CRUD, images, search) lives outside this system;
/// the ledger core only consumes lookups.
pub trait Catalogue: Send + Sync {
    fn product(&self, product_id: ProductId) -> Option<ProductRecord>;

    fn product_exists(&self, product_id: ProductId) -> bool {
        self.product(product_id).is_some()
    }

    fn unit_of_measure(&self, product_id: ProductId) -> Option<UnitOfMeasure> {
        self.product(product_id).map(|p| p.unit)
    }

    fn serial_tracked(&self, product_id: ProductId) -> Option<bool> {
        self.product(product_id).map(|p| p.serial_tracked)
    }
}

/// In-memory catalogue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalogue {
    products: std::sync::RwLock<std::collections::HashMap<ProductId, ProductRecord>>,
}

impl InMemoryCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, record: ProductRecord) {
        if let Ok(mut products) = self.products.write() {
            products.insert(record.product_id, record);
        }
    }
}

impl Catalogue for InMemoryCatalogue {
    fn product(&self, product_id: ProductId) -> Option<ProductRecord> {
        self.products
            .read()
            .ok()
            .and_then(|products| products.get(&product_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record(serial_tracked: bool) -> ProductRecord {
        ProductRecord {
            product_id: ProductId::new(AggregateId::new()),
            code: ProductCode::new("SKU-TV55").unwrap(),
            name: "55\" television".to_string(),
            unit: UnitOfMeasure::new("piece").unwrap(),
            serial_tracked,
            default_supplier: None,
        }
    }

    #[test]
    fn defined_product_is_found_with_attributes() {
        let catalogue = InMemoryCatalogue::new();
        let record = test_record(true);
        let id = record.product_id;

        catalogue.define(record);

        assert!(catalogue.product_exists(id));
        assert_eq!(catalogue.serial_tracked(id), Some(true));
        assert_eq!(
            catalogue.unit_of_measure(id).map(|u| u.as_str().to_string()),
            Some("piece".to_string())
        );
    }

    #[test]
    fn empty_product_code_is_rejected() {
        assert!(ProductCode::new("  ").is_err());
    }
}
