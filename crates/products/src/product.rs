use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packwave_core::{Aggregate, AggregateId, AggregateRoot, DomainError, WarehouseId};
use packwave_events::Event;

/// Product identifier (warehouse-scoped via `warehouse_id` fields in events/commands).
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

/// Product status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Archived,
}

/// Aggregate root: Product.
///
/// Identity data for stock and demand lines: SKU, display name, scan barcode.
/// Immutable for the reservation subsystem's purposes once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    warehouse_id: Option<WarehouseId>,
    sku: String,
    name: String,
    barcode: Option<String>,
    status: ProductStatus,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            warehouse_id: None,
            sku: String::new(),
            name: String::new(),
            barcode: None,
            status: ProductStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn barcode(&self) -> Option<&str> {
        self.barcode.as_deref()
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub barcode: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    ArchiveProduct(ArchiveProduct),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub barcode: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductArchived(ProductArchived),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "products.product.created",
            ProductEvent::ProductArchived(_) => "products.product.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.warehouse_id = Some(e.warehouse_id);
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.barcode = e.barcode.clone();
                self.status = ProductStatus::Active;
                self.created = true;
            }
            ProductEvent::ProductArchived(_) => {
                self.status = ProductStatus::Archived;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Product {
    fn ensure_warehouse(&self, warehouse_id: WarehouseId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.warehouse_id != Some(warehouse_id) {
            return Err(DomainError::invariant("warehouse mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            warehouse_id: cmd.warehouse_id,
            product_id: cmd.product_id,
            sku: cmd.sku.clone(),
            name: cmd.name.clone(),
            barcode: cmd.barcode.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_warehouse(cmd.warehouse_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::conflict("product already archived"));
        }

        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            warehouse_id: cmd.warehouse_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packwave_core::AggregateId;

    fn test_warehouse_id() -> WarehouseId {
        WarehouseId::new()
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn create_product_emits_product_created_event() {
        let product = Product::empty(test_product_id());
        let warehouse_id = test_warehouse_id();
        let product_id = test_product_id();
        let cmd = CreateProduct {
            warehouse_id,
            product_id,
            sku: "SKU-001".to_string(),
            name: "Blue widget".to_string(),
            barcode: Some("4006381333931".to_string()),
            occurred_at: test_time(),
        };

        let events = product
            .handle(&ProductCommand::CreateProduct(cmd))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            ProductEvent::ProductCreated(e) => {
                assert_eq!(e.warehouse_id, warehouse_id);
                assert_eq!(e.product_id, product_id);
                assert_eq!(e.sku, "SKU-001");
            }
            _ => panic!("Expected ProductCreated event"),
        }
    }

    #[test]
    fn create_rejects_blank_sku() {
        let product = Product::empty(test_product_id());
        let cmd = CreateProduct {
            warehouse_id: test_warehouse_id(),
            product_id: test_product_id(),
            sku: "   ".to_string(),
            name: "Blue widget".to_string(),
            barcode: None,
            occurred_at: test_time(),
        };

        let err = product
            .handle(&ProductCommand::CreateProduct(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn archive_transitions_active_to_archived() {
        let mut product = Product::empty(test_product_id());
        let warehouse_id = test_warehouse_id();
        let product_id = test_product_id();

        let events = product
            .handle(&ProductCommand::CreateProduct(CreateProduct {
                warehouse_id,
                product_id,
                sku: "SKU-002".to_string(),
                name: "Red widget".to_string(),
                barcode: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        product.apply(&events[0]);
        assert_eq!(product.status(), ProductStatus::Active);

        let events = product
            .handle(&ProductCommand::ArchiveProduct(ArchiveProduct {
                warehouse_id,
                product_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        product.apply(&events[0]);
        assert_eq!(product.status(), ProductStatus::Archived);

        // Archiving twice is a conflict.
        let err = product
            .handle(&ProductCommand::ArchiveProduct(ArchiveProduct {
                warehouse_id,
                product_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn version_increments_on_apply() {
        let mut product = Product::empty(test_product_id());
        assert_eq!(product.version(), 0);

        let events = product
            .handle(&ProductCommand::CreateProduct(CreateProduct {
                warehouse_id: test_warehouse_id(),
                product_id: test_product_id(),
                sku: "SKU-003".to_string(),
                name: "Green widget".to_string(),
                barcode: None,
                occurred_at: test_time(),
            }))
            .unwrap();
        product.apply(&events[0]);
        assert_eq!(product.version(), 1);
    }
}
