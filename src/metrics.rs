use tracing::trace;

// Counter events are emitted as trace records; the Prometheus endpoint only
// exposes what a recorder picks up.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "supplier_sync.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn page_synced(page: u64, inserted: u64, updated: u64, failed: u64) {
    trace!(
        target = "supplier_sync.metrics",
        page,
        inserted,
        updated,
        failed,
        "catalog_page_synced"
    );
}

pub fn photo_outcome(outcome: &'static str) {
    trace!(
        target = "supplier_sync.metrics",
        outcome = outcome,
        "photo_outcome_inc"
    );
}
