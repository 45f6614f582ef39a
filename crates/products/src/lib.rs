//! `packwave-products` — product catalog domain.

pub mod product;

pub use product::{
    ArchiveProduct, CreateProduct, Product, ProductArchived, ProductCommand, ProductCreated,
    ProductEvent, ProductId, ProductStatus,
};
