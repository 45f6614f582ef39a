//! Warehouse-isolated read model storage abstractions.

pub mod warehouse_store;

pub use warehouse_store::{InMemoryWarehouseStore, WarehouseStore};
