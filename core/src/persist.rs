//! On-disk form of an index.
//!
//! An index is a handful of named blobs written through an [`IndexStore`]:
//!
//! | blob             | content                                                   |
//! |------------------|-----------------------------------------------------------|
//! | `dictionary.bin` | varint count, then sorted `(term, term id)` pairs          |
//! | `postings.bin`   | per term ID ascending: varint byte length + encoded list  |
//! | `authority.bin`  | u32 LE count, then one f64 LE per document ID             |
//! | `documents.bin`  | bincode [`DocumentsFile`]                                 |
//! | `meta.json`      | [`MetaFile`]                                              |
//!
//! `meta.json` is written last, so a directory without it is never mistaken
//! for a complete index.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::codec::{decode_postings, encode_postings, write_str, write_varint, ByteReader};
use crate::documents::DocumentRecord;
use crate::error::{EngineError, Result};
use crate::pagerank::AuthorityTable;
use crate::postings::PostingsList;
use crate::{DocId, TermId};

pub const FORMAT_VERSION: u32 = 1;

pub const DICTIONARY_BLOB: &str = "dictionary.bin";
pub const POSTINGS_BLOB: &str = "postings.bin";
pub const AUTHORITY_BLOB: &str = "authority.bin";
pub const DOCUMENTS_BLOB: &str = "documents.bin";
pub const META_BLOB: &str = "meta.json";

/// Named-blob storage backing a persisted index.
pub trait IndexStore: Send + Sync {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()>;
    /// `None` when the blob was never written.
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;
    fn flush(&self) -> Result<()>;
}

/// One file per blob under a root directory.
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl IndexStore for DirectoryStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let tmp = self.root.join(format!("{name}.tmp"));
        {
            let mut f = File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, self.root.join(name))?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.root.join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Blobs as keys of a sled database.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self { db: sled::open(path)? })
    }
}

impl IndexStore for SledStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.db.insert(name.as_bytes(), bytes)?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(name.as_bytes())?.map(|v| v.to_vec()))
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MemoryStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl IndexStore for MemoryStore {
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.lock().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(name).cloned())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u32,
    pub created_at: String,
    pub num_docs: u64,
    pub num_terms: u64,
}

impl MetaFile {
    pub fn new(num_docs: u64, num_terms: u64) -> Self {
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::from("unknown"));
        Self { version: FORMAT_VERSION, created_at, num_docs, num_terms }
    }
}

/// Document registry and link graph, which have no compact codec of their
/// own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentsFile {
    pub records: Vec<DocumentRecord>,
    /// Outlinks per document ID.
    pub outlinks: Vec<Vec<DocId>>,
}

/// Everything needed to rebuild an engine.
#[derive(Debug, Clone)]
pub struct IndexImage {
    pub meta: MetaFile,
    /// In term-ID order.
    pub terms: Vec<(String, PostingsList)>,
    pub authority: AuthorityTable,
    pub documents: DocumentsFile,
}

pub fn encode_dictionary(terms: &[(&str, TermId)]) -> Vec<u8> {
    let mut sorted: Vec<(&str, TermId)> = terms.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));
    let mut buf = Vec::new();
    write_varint(&mut buf, sorted.len() as u64);
    for (term, id) in sorted {
        write_str(&mut buf, term);
        write_varint(&mut buf, id as u64);
    }
    buf
}

/// Returns terms indexed by term ID. IDs must be a permutation of
/// `0..count` and terms strictly ascending.
pub fn decode_dictionary(bytes: &[u8]) -> Result<Vec<String>> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_varint()? as usize;
    if count > bytes.len() {
        return Err(EngineError::corrupt(format!("dictionary claims {count} terms in {} bytes", bytes.len())));
    }
    let mut by_id: Vec<Option<String>> = vec![None; count];
    let mut previous: Option<&str> = None;
    for _ in 0..count {
        let term = reader.read_str()?;
        let id = reader.read_u32()? as usize;
        if previous.is_some_and(|p| p >= term) {
            return Err(EngineError::corrupt(format!("dictionary not sorted at {term:?}")));
        }
        previous = Some(term);
        match by_id.get_mut(id) {
            Some(slot @ None) => *slot = Some(term.to_string()),
            _ => return Err(EngineError::corrupt(format!("bad or duplicate term id {id}"))),
        }
    }
    if !reader.is_empty() {
        return Err(EngineError::corrupt("trailing bytes after dictionary"));
    }
    by_id
        .into_iter()
        .enumerate()
        .map(|(id, t)| t.ok_or_else(|| EngineError::corrupt(format!("term id {id} missing"))))
        .collect()
}

pub fn encode_postings_blob<'a, I>(lists: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a PostingsList>,
{
    let mut buf = Vec::new();
    let mut scratch = Vec::new();
    for list in lists {
        scratch.clear();
        encode_postings(list, &mut scratch);
        write_varint(&mut buf, scratch.len() as u64);
        buf.extend_from_slice(&scratch);
    }
    buf
}

pub fn decode_postings_blob(bytes: &[u8], expected_terms: usize) -> Result<Vec<PostingsList>> {
    let mut reader = ByteReader::new(bytes);
    let mut lists = Vec::with_capacity(expected_terms);
    while !reader.is_empty() {
        let len = reader.read_varint()? as usize;
        let mut inner = ByteReader::new(reader.read_bytes(len)?);
        let list = decode_postings(&mut inner)?;
        if !inner.is_empty() {
            return Err(EngineError::corrupt(format!("postings list {} has trailing bytes", lists.len())));
        }
        lists.push(list);
    }
    if lists.len() != expected_terms {
        return Err(EngineError::corrupt(format!(
            "expected {expected_terms} postings lists, found {}",
            lists.len()
        )));
    }
    Ok(lists)
}

pub fn encode_authority(table: &AuthorityTable) -> Vec<u8> {
    let scores = table.as_slice();
    let mut buf = Vec::with_capacity(4 + scores.len() * 8);
    buf.extend_from_slice(&(scores.len() as u32).to_le_bytes());
    for s in scores {
        buf.extend_from_slice(&s.to_le_bytes());
    }
    buf
}

pub fn decode_authority(bytes: &[u8]) -> Result<AuthorityTable> {
    let (head, body) = bytes
        .split_first_chunk::<4>()
        .ok_or_else(|| EngineError::corrupt("authority table shorter than its header"))?;
    let count = u32::from_le_bytes(*head) as usize;
    if body.len() != count * 8 {
        return Err(EngineError::corrupt(format!(
            "authority table declares {count} scores but holds {} bytes",
            body.len()
        )));
    }
    let mut scores = Vec::with_capacity(count);
    for chunk in body.chunks_exact(8) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        scores.push(f64::from_le_bytes(raw));
    }
    Ok(AuthorityTable::from_scores(scores))
}

pub fn write_index(store: &dyn IndexStore, image: &IndexImage) -> Result<()> {
    let dictionary: Vec<(&str, TermId)> = image
        .terms
        .iter()
        .enumerate()
        .map(|(id, (term, _))| (term.as_str(), id as TermId))
        .collect();
    store.put(DICTIONARY_BLOB, &encode_dictionary(&dictionary))?;
    store.put(POSTINGS_BLOB, &encode_postings_blob(image.terms.iter().map(|(_, l)| l)))?;
    store.put(AUTHORITY_BLOB, &encode_authority(&image.authority))?;
    store.put(DOCUMENTS_BLOB, &bincode::serialize(&image.documents)?)?;
    store.put(META_BLOB, serde_json::to_string_pretty(&image.meta)?.as_bytes())?;
    store.flush()?;
    tracing::info!(docs = image.meta.num_docs, terms = image.meta.num_terms, "index written");
    Ok(())
}

fn required(store: &dyn IndexStore, name: &str) -> Result<Vec<u8>> {
    store
        .get(name)?
        .ok_or_else(|| EngineError::missing_index(format!("blob {name} not found")))
}

pub fn read_index(store: &dyn IndexStore) -> Result<IndexImage> {
    let meta: MetaFile = serde_json::from_slice(&required(store, META_BLOB)?)?;
    if meta.version != FORMAT_VERSION {
        return Err(EngineError::corrupt(format!(
            "unsupported index format version {} (expected {FORMAT_VERSION})",
            meta.version
        )));
    }
    let names = decode_dictionary(&required(store, DICTIONARY_BLOB)?)?;
    if names.len() as u64 != meta.num_terms {
        return Err(EngineError::corrupt(format!(
            "meta lists {} terms, dictionary has {}",
            meta.num_terms,
            names.len()
        )));
    }
    let lists = decode_postings_blob(&required(store, POSTINGS_BLOB)?, names.len())?;
    let authority = decode_authority(&required(store, AUTHORITY_BLOB)?)?;
    let documents: DocumentsFile = bincode::deserialize(&required(store, DOCUMENTS_BLOB)?)?;
    if documents.outlinks.len() > documents.records.len() {
        return Err(EngineError::corrupt("more outlink rows than documents"));
    }
    let terms = names.into_iter().zip(lists).collect();
    tracing::info!(docs = meta.num_docs, terms = meta.num_terms, created_at = %meta.created_at, "index loaded");
    Ok(IndexImage { meta, terms, authority, documents })
}
