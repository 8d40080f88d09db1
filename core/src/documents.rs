//! Locator → document ID registry. IDs are dense and never reused; outlink
//! targets not fetched yet are kept as placeholders.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::DocId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    /// Known only as an outlink target.
    Placeholder,
    Indexed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub locator: String,
    pub status: DocumentStatus,
}

#[derive(Default)]
struct Registry {
    by_locator: HashMap<String, DocId>,
    records: Vec<DocumentRecord>,
}

#[derive(Default)]
pub struct DocumentRegistry {
    inner: RwLock<Registry>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<DocumentRecord>) -> Self {
        let by_locator = records
            .iter()
            .enumerate()
            .map(|(id, r)| (r.locator.clone(), id as DocId))
            .collect();
        Self { inner: RwLock::new(Registry { by_locator, records }) }
    }

    /// Returns the ID for an already-normalized locator, creating a
    /// placeholder if it has never been seen.
    pub fn resolve(&self, locator: &str) -> DocId {
        if let Some(&id) = self.inner.read().by_locator.get(locator) {
            return id;
        }
        let mut inner = self.inner.write();
        if let Some(&id) = inner.by_locator.get(locator) {
            return id;
        }
        let id = inner.records.len() as DocId;
        inner.records.push(DocumentRecord { locator: locator.to_string(), status: DocumentStatus::Placeholder });
        inner.by_locator.insert(locator.to_string(), id);
        id
    }

    pub fn lookup(&self, locator: &str) -> Option<DocId> {
        self.inner.read().by_locator.get(locator).copied()
    }

    pub fn mark_indexed(&self, id: DocId) {
        if let Some(record) = self.inner.write().records.get_mut(id as usize) {
            record.status = DocumentStatus::Indexed;
        }
    }

    pub fn locator(&self, id: DocId) -> Option<String> {
        self.inner.read().records.get(id as usize).map(|r| r.locator.clone())
    }

    /// Whether the document's host is `site` or one of its subdomains.
    pub fn is_on_site(&self, id: DocId, site: &str) -> bool {
        self.inner
            .read()
            .records
            .get(id as usize)
            .is_some_and(|r| locator_on_site(&r.locator, site))
    }

    pub fn status(&self, id: DocId) -> Option<DocumentStatus> {
        self.inner.read().records.get(id as usize).map(|r| r.status)
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn placeholder_count(&self) -> usize {
        self.inner
            .read()
            .records
            .iter()
            .filter(|r| r.status == DocumentStatus::Placeholder)
            .count()
    }

    pub fn records(&self) -> Vec<DocumentRecord> {
        self.inner.read().records.clone()
    }
}

pub fn locator_on_site(locator: &str, site: &str) -> bool {
    let Some(host) = Url::parse(locator).ok().and_then(|u| u.host_str().map(str::to_string)) else {
        return false;
    };
    let site = site.trim_end_matches('/').to_lowercase();
    host == site || host.strip_suffix(site.as_str()).is_some_and(|rest| rest.ends_with('.'))
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || key == "ref" || key == "source"
}

/// Canonical form of a locator so that trivially different spellings of one
/// page share a document ID.
///
/// URLs get a lowercase scheme and host, lose their fragment, tracking
/// parameters and trailing path slash, and have their remaining query pairs
/// sorted. Anything that is not an absolute URL with a host (file paths, for
/// instance) is only trimmed.
pub fn normalize_locator(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut url = match Url::parse(trimmed) {
        Ok(url) if url.has_host() => url,
        _ => return trimmed.to_string(),
    };
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    url.to_string()
}
