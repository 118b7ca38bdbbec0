//! `stocklot-catalogue` — external product catalogue boundary.

pub mod product;

pub use product::{
    Catalogue, InMemoryCatalogue, ProductCode, ProductId, ProductRecord, UnitOfMeasure,
};
