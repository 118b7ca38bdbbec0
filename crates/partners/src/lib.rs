//! `stocklot-partners` — external partner (supplier/customer) boundary.

pub mod party;

pub use party::{InMemoryPartnerDirectory, PartnerDirectory, PartyId, PartyRole};
