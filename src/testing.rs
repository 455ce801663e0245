//! In-memory collaborators for engine and route tests.

use crate::catalog::{CatalogRecord, ExistingRecord, PhotoCandidate};
use crate::feed::{FeedConnector, FeedError, FeedRequestConfig, SupplierFeed};
use crate::sync::store::{
    CatalogStore, FetchProxy, PhotoQuery, ProxyError, ProxyRequest, StoreError,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::time::Instant;

/// Supplier item in the shape the tests map: `Code`, `Name`, `Price`, `Stock`.
pub fn feed_item(code: &str, stock: i64) -> Value {
    json!({
        "Code": code,
        "Name": format!("Tyre {code} 205/55 R16"),
        "Price": "1 000,00",
        "Stock": [{"Value": format!(">{stock}")}]
    })
}

pub fn feed_page(items: Vec<Value>) -> Value {
    json!({"Success": true, "Result": {"Items": items}})
}

/// Serves fixed pages by offset; past the end it serves an empty list.
pub struct StaticFeed {
    pages: Vec<Value>,
    pub requests: Mutex<Vec<(usize, usize)>>,
}

impl StaticFeed {
    pub fn new(pages: Vec<Value>) -> Self {
        Self {
            pages,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SupplierFeed for StaticFeed {
    async fn fetch_page(&self, offset: usize, count: usize) -> Result<Value, FeedError> {
        self.requests.lock().unwrap().push((offset, count));
        let index = if count == 0 { 0 } else { offset / count };
        Ok(self
            .pages
            .get(index)
            .cloned()
            .unwrap_or_else(|| feed_page(Vec::new())))
    }
}

pub struct FailingFeed;

#[async_trait]
impl SupplierFeed for FailingFeed {
    async fn fetch_page(&self, _offset: usize, _count: usize) -> Result<Value, FeedError> {
        Err(FeedError::Unauthorized(401))
    }
}

/// Connector handing out a [`StaticFeed`] over shared pages.
pub struct StaticConnector {
    pub pages: Vec<Value>,
}

impl FeedConnector for StaticConnector {
    fn connect(&self, config: &FeedRequestConfig) -> Result<Box<dyn SupplierFeed>, FeedError> {
        config.validate().map_err(FeedError::InvalidConfig)?;
        Ok(Box::new(StaticFeed::new(self.pages.clone())))
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    rows: Mutex<BTreeMap<i64, CatalogRecord>>,
    pub fail_inserts: AtomicBool,
    pub insert_calls: Mutex<Vec<usize>>,
    pub upsert_calls: Mutex<Vec<usize>>,
}

impl MemoryCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, mut record: CatalogRecord) -> i64 {
        let mut rows = self.rows.lock().unwrap();
        let id = rows.keys().next_back().copied().unwrap_or(0) + 1;
        record.id = Some(id);
        rows.insert(id, record);
        id
    }

    /// Rows for the photo sync: `product_number` is `100 + id`.
    pub fn seed_photo_rows(&self, count: usize, image_url: Option<&str>) -> Vec<i64> {
        (0..count)
            .map(|_| {
                let next = self.len() as i64 + 1;
                let mut row = catalog_row(&format!("P-{next}"), 1);
                row.product_number = (100 + next).to_string();
                row.image_url = image_url.map(str::to_string);
                self.seed(row)
            })
            .collect()
    }

    pub fn rows(&self) -> Vec<CatalogRecord> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn row(&self, id: i64) -> Option<CatalogRecord> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn find_key(rows: &BTreeMap<i64, CatalogRecord>, record: &CatalogRecord) -> Option<i64> {
        rows.iter()
            .find(|(_, row)| {
                row.supplier_id == record.supplier_id && row.catalog_number == record.catalog_number
            })
            .map(|(id, _)| *id)
    }

    fn candidate(row: &CatalogRecord) -> PhotoCandidate {
        PhotoCandidate {
            id: row.id.unwrap_or_default(),
            catalog_number: row.catalog_number.clone(),
            product_number: row.product_number.clone(),
            supplier_id: row.supplier_id,
            image_url: row.image_url.clone(),
        }
    }

    fn matches(query: &PhotoQuery, row: &CatalogRecord) -> bool {
        use crate::sync::store::PhotoMode;
        let supplier_ok = query.supplier_id.is_none_or(|id| id == row.supplier_id);
        let image_ok = match query.mode {
            PhotoMode::Missing => PhotoMode::Missing.is_eligible(row.image_url.as_deref(), 0),
            PhotoMode::Force | PhotoMode::FixBroken => true,
        };
        supplier_ok && image_ok
    }
}

pub fn catalog_row(catalog_number: &str, supplier_id: i64) -> CatalogRecord {
    CatalogRecord {
        id: None,
        catalog_number: catalog_number.to_string(),
        supplier_id,
        product_number: String::new(),
        title: format!("Existing {catalog_number}"),
        manufacturer: String::new(),
        price: Decimal::from(10),
        base_price: Decimal::from(8),
        stock_quantity: 1,
        in_stock: true,
        season: Default::default(),
        vehicle_type: Default::default(),
        radius: String::new(),
        image_url: None,
        description: String::new(),
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn find_by_keys(
        &self,
        supplier_id: i64,
        catalog_numbers: &[String],
    ) -> Result<Vec<ExistingRecord>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|row| row.supplier_id == supplier_id && catalog_numbers.contains(&row.catalog_number))
            .map(|row| ExistingRecord {
                id: row.id.unwrap_or_default(),
                catalog_number: row.catalog_number.clone(),
                supplier_id: row.supplier_id,
            })
            .collect())
    }

    async fn insert_many(&self, records: &[CatalogRecord]) -> Result<usize, StoreError> {
        self.insert_calls.lock().unwrap().push(records.len());
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("insert disabled".into()));
        }
        let mut rows = self.rows.lock().unwrap();
        if records.iter().any(|record| Self::find_key(&rows, record).is_some()) {
            return Err(StoreError::Rejected("duplicate key value violates unique constraint".into()));
        }
        for record in records {
            let id = rows.keys().next_back().copied().unwrap_or(0) + 1;
            let mut row = record.clone();
            row.id = Some(id);
            rows.insert(id, row);
        }
        Ok(records.len())
    }

    async fn upsert_many(&self, records: &[CatalogRecord]) -> Result<usize, StoreError> {
        self.upsert_calls.lock().unwrap().push(records.len());
        let mut rows = self.rows.lock().unwrap();
        for record in records {
            match Self::find_key(&rows, record) {
                Some(id) => {
                    let previous_image = rows.get(&id).and_then(|row| row.image_url.clone());
                    let mut row = record.clone();
                    row.id = Some(id);
                    row.image_url = record.image_url.clone().or(previous_image);
                    rows.insert(id, row);
                }
                None => {
                    let id = rows.keys().next_back().copied().unwrap_or(0) + 1;
                    let mut row = record.clone();
                    row.id = Some(id);
                    rows.insert(id, row);
                }
            }
        }
        Ok(records.len())
    }

    async fn page_after(
        &self,
        query: &PhotoQuery,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<PhotoCandidate>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .range(after_id + 1..)
            .map(|(_, row)| row)
            .filter(|row| Self::matches(query, row))
            .take(limit)
            .map(Self::candidate)
            .collect())
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<PhotoCandidate>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id))
            .map(Self::candidate)
            .collect())
    }

    async fn count(&self, query: &PhotoQuery, after_id: i64) -> Result<u64, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .range(after_id + 1..)
            .filter(|(_, row)| Self::matches(query, row))
            .count() as u64)
    }

    async fn set_image(&self, id: i64, image_url: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::Rejected(format!("no row {id}")))?;
        row.image_url = Some(image_url.to_string());
        row.in_stock = true;
        Ok(())
    }
}

type Responder = dyn Fn(&ProxyRequest) -> Result<String, ProxyError> + Send + Sync;

/// Fetch proxy answering through a closure; records every call with the
/// (tokio) time it was made.
pub struct ScriptedProxy {
    respond: Box<Responder>,
    pub calls: Mutex<Vec<(ProxyRequest, Instant)>>,
}

impl ScriptedProxy {
    pub fn new(
        respond: impl Fn(&ProxyRequest) -> Result<String, ProxyError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Succeeds with a storage URL derived from the upload path.
    pub fn uploading() -> Arc<Self> {
        Self::new(|request| {
            Ok(format!(
                "https://storage.example/{}/{}",
                request.upload.bucket, request.upload.path
            ))
        })
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(request, _)| request.url.clone())
            .collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl FetchProxy for ScriptedProxy {
    async fn fetch_image(&self, request: &ProxyRequest) -> Result<String, ProxyError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.clone(), Instant::now()));
        (self.respond)(request)
    }
}
