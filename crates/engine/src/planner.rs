//! Pure allocation planning against a ledger snapshot.
//!
//! Planning never mutates anything: it computes, for a whole document (or a
//! whole wave of documents, cumulatively), which reservations would satisfy
//! the demand — or exactly what is short. The engine turns an approved plan
//! into one atomic ledger command afterwards.

use std::collections::{BTreeMap, BTreeSet};

use packwave_demand::{DemandBody, DemandDocument};
use packwave_products::ProductId;
use packwave_stock::{ReservationEntry, StockLedger, StorageUnitId, UnitClaim};

use crate::error::AllocationError;

/// One short line discovered during planning, before SKU/name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedShortage {
    pub product_id: ProductId,
    pub needed: u32,
    pub available: u32,
    pub missing: u32,
}

/// A document's planned reservations and claims.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocumentPlan {
    pub entries: Vec<ReservationEntry>,
    pub claims: Vec<UnitClaim>,
}

/// Planning overlay over an immutable ledger snapshot.
///
/// Consumption is tracked here so several documents of one wave plan against
/// shared availability: what the first document takes, the later ones no
/// longer see.
#[derive(Debug)]
pub struct LedgerPlanner<'a> {
    ledger: &'a StockLedger,
    consumed: BTreeMap<(StorageUnitId, ProductId), u32>,
    claimed: BTreeSet<StorageUnitId>,
}

impl<'a> LedgerPlanner<'a> {
    pub fn new(ledger: &'a StockLedger) -> Self {
        Self {
            ledger,
            consumed: BTreeMap::new(),
            claimed: BTreeSet::new(),
        }
    }

    /// Availability of a product as this planner currently sees it.
    pub fn remaining_available(&self, product_id: ProductId) -> u32 {
        self.ledger
            .fifo_lines(product_id)
            .iter()
            .filter(|(unit_id, _)| !self.claimed.contains(unit_id))
            .map(|(unit_id, line)| {
                let eaten = self
                    .consumed
                    .get(&(*unit_id, product_id))
                    .copied()
                    .unwrap_or(0);
                line.available().saturating_sub(eaten)
            })
            .sum()
    }

    /// Plan one document. Evaluates every line before reporting: the result
    /// is either a complete plan or the complete list of short lines.
    ///
    /// On shortage, nothing is consumed from the overlay — a short document
    /// inside a wave must not eat availability from its siblings (the whole
    /// wave fails anyway, but the report should show each document against
    /// the same snapshot it was evaluated on).
    pub fn plan_document(
        &mut self,
        document: &DemandDocument,
    ) -> Result<Result<DocumentPlan, Vec<PlannedShortage>>, AllocationError> {
        match document.body() {
            DemandBody::Items { lines } => Ok(self.plan_item_lines(document, lines)),
            DemandBody::StorageUnits { units } => self.plan_whole_units(document, units),
        }
    }

    fn plan_item_lines(
        &mut self,
        document: &DemandDocument,
        lines: &[packwave_demand::DemandLine],
    ) -> Result<DocumentPlan, Vec<PlannedShortage>> {
        let document_id = document.id_typed().0;
        let mut plan = DocumentPlan::default();
        let mut shortages = Vec::new();
        // Staged consumption: only merged into the overlay if the whole
        // document plans clean.
        let mut staged: BTreeMap<(StorageUnitId, ProductId), u32> = BTreeMap::new();

        for line in lines {
            let mut remaining = line.requested;

            // Greedy FIFO within the document too: earlier lines of the same
            // product see what this document already staged.
            for (unit_id, stock_line) in self.ledger.fifo_lines(line.product_id) {
                if remaining == 0 {
                    break;
                }
                if self.claimed.contains(&unit_id) {
                    continue;
                }
                let key = (unit_id, line.product_id);
                let eaten = self.consumed.get(&key).copied().unwrap_or(0)
                    + staged.get(&key).copied().unwrap_or(0);
                let available = stock_line.available().saturating_sub(eaten);
                if available == 0 {
                    continue;
                }

                let take = remaining.min(available);
                staged
                    .entry(key)
                    .and_modify(|q| *q += take)
                    .or_insert(take);
                plan.entries.push(ReservationEntry {
                    document_id,
                    storage_unit_id: unit_id,
                    product_id: line.product_id,
                    quantity: take,
                });
                remaining -= take;
            }

            if remaining > 0 {
                shortages.push(PlannedShortage {
                    product_id: line.product_id,
                    needed: line.requested,
                    available: line.requested - remaining,
                    missing: remaining,
                });
            }
        }

        if !shortages.is_empty() {
            return Err(shortages);
        }

        for (key, qty) in staged {
            self.consumed
                .entry(key)
                .and_modify(|q| *q += qty)
                .or_insert(qty);
        }
        Ok(plan)
    }

    fn plan_whole_units(
        &mut self,
        document: &DemandDocument,
        units: &[StorageUnitId],
    ) -> Result<Result<DocumentPlan, Vec<PlannedShortage>>, AllocationError> {
        let document_id = document.id_typed().0;
        let mut plan = DocumentPlan::default();
        let mut shortages = Vec::new();

        for unit_id in units {
            let unit = self.ledger.unit(*unit_id).ok_or_else(|| {
                AllocationError::InvalidState(format!(
                    "document references unknown storage unit {unit_id}"
                ))
            })?;
            if unit.lines.is_empty() {
                return Err(AllocationError::InvalidState(format!(
                    "storage unit {unit_id} is empty"
                )));
            }

            // A whole-unit pick needs the unit untouched: no existing claim,
            // no claim staged by this plan, no foreign hard commitments.
            let blocked = self.ledger.claim_of(*unit_id).is_some()
                || self.claimed.contains(unit_id)
                || unit.has_commitments()
                || unit
                    .lines
                    .keys()
                    .any(|p| self.consumed.keys().any(|(u, cp)| u == unit_id && cp == p));

            if blocked {
                for (product_id, line) in &unit.lines {
                    shortages.push(PlannedShortage {
                        product_id: *product_id,
                        needed: line.quantity,
                        available: 0,
                        missing: line.quantity,
                    });
                }
                continue;
            }

            for (product_id, line) in &unit.lines {
                plan.entries.push(ReservationEntry {
                    document_id,
                    storage_unit_id: *unit_id,
                    product_id: *product_id,
                    quantity: line.quantity,
                });
            }
            plan.claims.push(UnitClaim {
                storage_unit_id: *unit_id,
                document_id,
            });
        }

        if !shortages.is_empty() {
            return Ok(Err(shortages));
        }

        for claim in &plan.claims {
            self.claimed.insert(claim.storage_unit_id);
        }
        for entry in &plan.entries {
            self.consumed
                .entry((entry.storage_unit_id, entry.product_id))
                .and_modify(|q| *q += entry.quantity)
                .or_insert(entry.quantity);
        }
        Ok(Ok(plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use packwave_core::{Aggregate, AggregateId, WarehouseId};
    use packwave_demand::{
        AddLine, ApproveDocument, DemandCategory, DemandDocumentCommand, DemandKind, DocumentId,
        OpenDocument,
    };
    use packwave_stock::{
        LedgerId, OpenLedger, ReceiveStock, RegisterStorageUnit, StockLedgerCommand, Zone,
    };

    fn ledger_with(
        warehouse_id: WarehouseId,
        units: &[(StorageUnitId, &str)],
        stock: &[(StorageUnitId, ProductId, u32)],
    ) -> StockLedger {
        let ledger_id = LedgerId::for_warehouse(warehouse_id);
        let mut ledger = StockLedger::empty(ledger_id);
        let mut run = |cmd: StockLedgerCommand, ledger: &mut StockLedger| {
            let events = ledger.handle(&cmd).unwrap();
            for e in &events {
                ledger.apply(e);
            }
        };
        run(
            StockLedgerCommand::OpenLedger(OpenLedger {
                warehouse_id,
                ledger_id,
                occurred_at: Utc::now(),
            }),
            &mut ledger,
        );
        for (unit_id, zone) in units {
            run(
                StockLedgerCommand::RegisterStorageUnit(RegisterStorageUnit {
                    warehouse_id,
                    ledger_id,
                    storage_unit_id: *unit_id,
                    zone: Zone::new(*zone),
                    occurred_at: Utc::now(),
                }),
                &mut ledger,
            );
        }
        for (unit_id, product_id, qty) in stock {
            run(
                StockLedgerCommand::ReceiveStock(ReceiveStock {
                    warehouse_id,
                    ledger_id,
                    storage_unit_id: *unit_id,
                    product_id: *product_id,
                    quantity: *qty,
                    occurred_at: Utc::now(),
                }),
                &mut ledger,
            );
        }
        ledger
    }

    fn item_document(
        warehouse_id: WarehouseId,
        lines: &[(ProductId, u32)],
    ) -> DemandDocument {
        let document_id = DocumentId::new(AggregateId::new());
        let mut doc = DemandDocument::empty(document_id);
        let mut run = |cmd: DemandDocumentCommand, doc: &mut DemandDocument| {
            let events = doc.handle(&cmd).unwrap();
            for e in &events {
                doc.apply(e);
            }
        };
        run(
            DemandDocumentCommand::OpenDocument(OpenDocument {
                warehouse_id,
                document_id,
                category: DemandCategory::Order,
                kind: DemandKind::Item,
                occurred_at: Utc::now(),
            }),
            &mut doc,
        );
        for (product_id, qty) in lines {
            run(
                DemandDocumentCommand::AddLine(AddLine {
                    warehouse_id,
                    document_id,
                    product_id: *product_id,
                    quantity: *qty,
                    occurred_at: Utc::now(),
                }),
                &mut doc,
            );
        }
        run(
            DemandDocumentCommand::ApproveDocument(ApproveDocument {
                warehouse_id,
                document_id,
                occurred_at: Utc::now(),
            }),
            &mut doc,
        );
        doc
    }

    #[test]
    fn greedy_fifo_takes_oldest_line_first() {
        let warehouse_id = WarehouseId::new();
        let product = ProductId::new(AggregateId::new());
        let unit_a = StorageUnitId::new(AggregateId::new());
        let unit_b = StorageUnitId::new(AggregateId::new());

        // A received first with 5, B later with 3; demand of 6 takes 5 then 1.
        let ledger = ledger_with(
            warehouse_id,
            &[(unit_a, "A"), (unit_b, "B")],
            &[(unit_a, product, 5), (unit_b, product, 3)],
        );
        let doc = item_document(warehouse_id, &[(product, 6)]);

        let mut planner = LedgerPlanner::new(&ledger);
        let plan = planner.plan_document(&doc).unwrap().unwrap();

        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.entries[0].storage_unit_id, unit_a);
        assert_eq!(plan.entries[0].quantity, 5);
        assert_eq!(plan.entries[1].storage_unit_id, unit_b);
        assert_eq!(plan.entries[1].quantity, 1);
        assert_eq!(planner.remaining_available(product), 2);
    }

    #[test]
    fn shortage_reports_every_short_line_and_consumes_nothing() {
        let warehouse_id = WarehouseId::new();
        let product_a = ProductId::new(AggregateId::new());
        let product_b = ProductId::new(AggregateId::new());
        let unit = StorageUnitId::new(AggregateId::new());

        let ledger = ledger_with(
            warehouse_id,
            &[(unit, "A")],
            &[(unit, product_a, 2), (unit, product_b, 1)],
        );
        let doc = item_document(warehouse_id, &[(product_a, 5), (product_b, 4)]);

        let mut planner = LedgerPlanner::new(&ledger);
        let shortages = planner.plan_document(&doc).unwrap().unwrap_err();

        assert_eq!(shortages.len(), 2);
        let a = shortages.iter().find(|s| s.product_id == product_a).unwrap();
        assert_eq!((a.needed, a.available, a.missing), (5, 2, 3));
        let b = shortages.iter().find(|s| s.product_id == product_b).unwrap();
        assert_eq!((b.needed, b.available, b.missing), (4, 1, 3));

        // Overlay untouched.
        assert_eq!(planner.remaining_available(product_a), 2);
        assert_eq!(planner.remaining_available(product_b), 1);
    }

    #[test]
    fn wave_style_cumulative_planning_starves_later_documents() {
        let warehouse_id = WarehouseId::new();
        let product = ProductId::new(AggregateId::new());
        let unit = StorageUnitId::new(AggregateId::new());

        let ledger = ledger_with(warehouse_id, &[(unit, "A")], &[(unit, product, 4)]);
        let first = item_document(warehouse_id, &[(product, 3)]);
        let second = item_document(warehouse_id, &[(product, 3)]);

        let mut planner = LedgerPlanner::new(&ledger);
        assert!(planner.plan_document(&first).unwrap().is_ok());

        let shortages = planner.plan_document(&second).unwrap().unwrap_err();
        assert_eq!(shortages.len(), 1);
        assert_eq!(
            (shortages[0].needed, shortages[0].available, shortages[0].missing),
            (3, 1, 2)
        );
    }
}
