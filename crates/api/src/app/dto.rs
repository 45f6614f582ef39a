//! Request/response DTOs and JSON mapping helpers.

use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use packwave_infra::projections::{
    atp::AtpReadModel, demand_documents::DemandDocumentReadModel,
    picking_jobs::PickingJobReadModel, product_catalog::ProductReadModel,
    stock_levels::StockLevelReadModel, waves::WaveReadModel,
};
use packwave_picking::TaskStatus;
use packwave_waves::Cluster;

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub barcode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterStorageUnitRequest {
    pub zone: String,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveStockRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct OpenDocumentRequest {
    /// "order" or "transfer".
    pub category: String,
    /// "item" or "storage_unit".
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct AddLineRequest {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct AddStorageUnitRequest {
    pub storage_unit_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateWaveRequest {
    pub document_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClusterQuery {
    pub min_similarity: Option<f64>,
    pub max_orders: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AssignPickerRequest {
    pub picker_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub aggregate_id: Option<String>,
    pub aggregate_type: Option<String>,
    pub event_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub fn product_to_json(rm: ProductReadModel) -> JsonValue {
    json!({
        "id": rm.product_id.to_string(),
        "sku": rm.sku,
        "name": rm.name,
        "barcode": rm.barcode,
        "status": rm.status,
    })
}

pub fn stock_level_to_json(rm: StockLevelReadModel) -> JsonValue {
    json!({
        "product_id": rm.product_id.to_string(),
        "physical_quantity": rm.physical_quantity,
        "hard_committed": rm.hard_committed,
        "physical_available": rm.physical_available(),
    })
}

pub fn atp_to_json(rm: AtpReadModel) -> JsonValue {
    json!({
        "product_id": rm.product_id.to_string(),
        "physical_quantity": rm.physical_quantity,
        "hard_committed": rm.hard_committed,
        "soft_committed": rm.soft_committed,
        "available_to_promise": rm.available_to_promise(),
    })
}

pub fn document_to_json(rm: DemandDocumentReadModel) -> JsonValue {
    json!({
        "id": rm.document_id.to_string(),
        "category": rm.category,
        "kind": rm.kind,
        "status": rm.status,
        "approved": rm.approved,
        "wave_id": rm.wave_id.map(|w| w.to_string()),
        "line_count": rm.line_count(),
        "total_requested": rm.total_requested(),
        "lines": rm
            .requested
            .iter()
            .map(|(product_id, requested)| {
                json!({
                    "product_id": product_id.to_string(),
                    "requested": requested,
                    "hard_allocated": rm.hard_allocated.get(product_id).copied().unwrap_or(0),
                })
            })
            .collect::<Vec<_>>(),
        "storage_units": rm
            .storage_units
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>(),
    })
}

pub fn wave_to_json(rm: WaveReadModel) -> JsonValue {
    json!({
        "id": rm.wave_id.to_string(),
        "status": rm.status,
        "documents": rm.documents.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        "stats": {
            "document_count": rm.stats.document_count,
            "total_lines": rm.stats.total_lines,
            "total_quantity": rm.stats.total_quantity,
        },
        "job_ids": rm.job_ids.iter().map(|j| j.to_string()).collect::<Vec<_>>(),
    })
}

pub fn picking_job_to_json(rm: PickingJobReadModel) -> JsonValue {
    json!({
        "id": rm.job_id.to_string(),
        "zone": rm.zone.as_str(),
        "status": rm.status,
        "picker": rm.picker.map(|p| p.to_string()),
        "picked_tasks": rm.picked_count(),
        "tasks": rm
            .tasks
            .iter()
            .map(|t| {
                json!({
                    "task_id": t.task_id.to_string(),
                    "document_id": t.document_id.to_string(),
                    "storage_unit_id": t.storage_unit_id.to_string(),
                    "product_id": t.product_id.to_string(),
                    "quantity": t.quantity,
                    "picked": t.status == TaskStatus::Picked,
                })
            })
            .collect::<Vec<_>>(),
    })
}

pub fn cluster_to_json(cluster: &Cluster) -> JsonValue {
    json!({
        "document_ids": cluster
            .document_ids
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>(),
        "product_count": cluster.products.len(),
        "total_lines": cluster.total_lines,
        "seed_similarity": cluster.seed_similarity,
        "size": cluster.size,
    })
}
