//! Persistent key -> tensor store shared with the lattice stage and the BSE solver.
//!
//! Two kinds of record exist: scalar/list metadata (`block_name`, `inner_name`,
//! `beta`) and complex tensor blocks keyed by `(block12, block34)` under a
//! record key such as `X_loc/3` or `gamma0`. Writing a block merges it into
//! the record, so several correlated shells may fill the same record.
use crate::error::{BseError, Result};
use crate::tensor::BlockKey;
use ndarray::{ArrayD, ArrayViewD};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// A metadata entry of the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
    Names(Vec<String>),
    Real(f64),
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Names(names) => write!(f, "{:?}", names),
            MetaValue::Real(x) => write!(f, "{:?}", x),
        }
    }
}

pub trait Archive {
    /// Write a metadata entry, replacing any previous value.
    fn put_meta(&mut self, key: &str, value: &MetaValue) -> Result<()>;
    fn get_meta(&self, key: &str) -> Result<Option<MetaValue>>;
    /// Write one block of a tensor record, replacing only that block.
    fn put_block(&mut self, key: &str, block: BlockKey, data: ArrayViewD<'_, Complex64>) -> Result<()>;
    /// All blocks of a record. Empty if the record was never written.
    fn get_blocks(&self, key: &str) -> Result<BTreeMap<BlockKey, ArrayD<Complex64>>>;
}

/// Archive stored as a directory tree of JSON files.
///
/// `<root>/<key>.json` holds a metadata entry and
/// `<root>/<key>/<block12>_<block34>.json` one tensor block.
#[derive(Debug, Clone)]
pub struct DirArchive {
    root: PathBuf,
}

impl DirArchive {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<DirArchive> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(DirArchive { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    fn record_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn parse_block_name(path: &Path) -> Option<BlockKey> {
    let stem = path.file_stem()?.to_str()?;
    let (a, b) = stem.split_once('_')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

impl Archive for DirArchive {
    fn put_meta(&mut self, key: &str, value: &MetaValue) -> Result<()> {
        write_json(&self.meta_path(key), value)
    }

    fn get_meta(&self, key: &str) -> Result<Option<MetaValue>> {
        let path = self.meta_path(key);
        if !path.is_file() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    fn put_block(&mut self, key: &str, block: BlockKey, data: ArrayViewD<'_, Complex64>) -> Result<()> {
        let path = self.record_dir(key).join(format!("{}_{}.json", block.0, block.1));
        write_json(&path, &data)
    }

    fn get_blocks(&self, key: &str) -> Result<BTreeMap<BlockKey, ArrayD<Complex64>>> {
        let dir = self.record_dir(key);
        let mut blocks = BTreeMap::new();
        if !dir.is_dir() {
            return Ok(blocks);
        }
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let block = parse_block_name(&path).ok_or_else(|| BseError::FileParse {
                file: path.display().to_string(),
                message: "block file name is not '<block12>_<block34>.json'".to_string(),
            })?;
            let reader = BufReader::new(File::open(&path)?);
            blocks.insert(block, serde_json::from_reader(reader)?);
        }
        Ok(blocks)
    }
}

/// In-memory archive with the same semantics as `DirArchive`.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    meta: BTreeMap<String, MetaValue>,
    records: BTreeMap<String, BTreeMap<BlockKey, ArrayD<Complex64>>>,
}

impl MemoryArchive {
    pub fn new() -> MemoryArchive {
        MemoryArchive::default()
    }

    pub fn record_keys(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }
}

impl Archive for MemoryArchive {
    fn put_meta(&mut self, key: &str, value: &MetaValue) -> Result<()> {
        self.meta.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<MetaValue>> {
        Ok(self.meta.get(key).cloned())
    }

    fn put_block(&mut self, key: &str, block: BlockKey, data: ArrayViewD<'_, Complex64>) -> Result<()> {
        self.records
            .entry(key.to_string())
            .or_default()
            .insert(block, data.to_owned());
        Ok(())
    }

    fn get_blocks(&self, key: &str) -> Result<BTreeMap<BlockKey, ArrayD<Complex64>>> {
        Ok(self.records.get(key).cloned().unwrap_or_default())
    }
}
