//! The spiral-file archive container.
//!
//! A spiral file is a ZIP archive with store-only members, one member per
//! named *part*. Because nothing is compressed, every part can be handed out
//! as a single contiguous byte range from one memory map of the whole file.
//! Parts nest by path (`"entry_sizes/values"`), each versioned component
//! carries a `part_info.json`, and the archive itself carries a
//! `file_info.json` with a UUID, the creator version and the command line
//! that produced it.
//!
//! Three open backends are supported: plain mmap, mmap with the parts
//! preloaded into private RAM buffers (for random-access-heavy indexes on
//! slow storage), and a pure in-memory storage used when no file is wanted
//! at all (mostly by tests).

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace};
use memmap2::Mmap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::SeqstoreError;
use crate::membuf::MemBuf;
use crate::Result;

/// A `major.minor.patch` version attached to a serialized part.
///
/// Opening fails when the stored major version exceeds the reader's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductVersion(pub &'static str);

impl ProductVersion {
    fn major(&self) -> u32 {
        parse_major(self.0).unwrap_or(0)
    }
}

fn parse_major(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}

#[derive(Debug, Serialize, Deserialize)]
struct PartInfo {
    version: String,
}

/// The archive-level header stored as `file_info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub uuid: String,
    pub creator: String,
    pub command_line: Vec<String>,
    pub created_unix: u64,
}

const FILE_INFO: &str = "file_info.json";
const PART_INFO: &str = "part_info.json";

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// The contents of an archive that was never written to disk.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    parts: BTreeMap<String, Arc<Vec<u8>>>,
}

impl MemStorage {
    /// Part path -> bytes, including the JSON headers.
    pub fn parts(&self) -> &BTreeMap<String, Arc<Vec<u8>>> {
        &self.parts
    }
}

/// An archive under construction. Parts accumulate in RAM and are written
/// out as a store-only ZIP at [`SpiralCreate::close`].
pub struct SpiralCreate {
    dest: Option<PathBuf>,
    parts: Mutex<BTreeMap<String, Vec<u8>>>,
    uuid: String,
}

impl SpiralCreate {
    /// Create an archive that will be written to `path` on close.
    pub fn file<P: AsRef<Path>>(path: P) -> SpiralCreate {
        SpiralCreate {
            dest: Some(path.as_ref().to_path_buf()),
            parts: Mutex::new(BTreeMap::new()),
            uuid: Uuid::new_v4().to_string(),
        }
    }

    /// Create an archive that lives only in memory.
    pub fn mem() -> SpiralCreate {
        SpiralCreate {
            dest: None,
            parts: Mutex::new(BTreeMap::new()),
            uuid: Uuid::new_v4().to_string(),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The root creation state.
    pub fn create(&self) -> CreateState<'_> {
        CreateState {
            file: self,
            prefix: String::new(),
        }
    }

    fn file_info(&self) -> FileInfo {
        FileInfo {
            uuid: self.uuid.clone(),
            creator: format!("libseqstore {}", env!("CARGO_PKG_VERSION")),
            command_line: std::env::args().collect(),
            created_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    fn insert(&self, path: String, bytes: Vec<u8>) {
        trace!("spiral create: part {} ({} bytes)", path, bytes.len());
        self.parts.lock().unwrap().insert(path, bytes);
    }

    /// Write the ZIP file and return its size in bytes.
    pub fn close(self) -> Result<u64> {
        let dest = self.dest.clone().ok_or_else(|| {
            SeqstoreError::invalid_op("cannot close an in-memory archive to disk")
        })?;
        let info = self.file_info();
        let mut parts = self.parts.into_inner().unwrap();
        parts.insert(FILE_INFO.to_string(), serde_json::to_vec_pretty(&info)?);

        let file = File::create(&dest)?;
        let mut writer = ZipWriter::new(BufWriter::new(file));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(true);
        for (name, bytes) in &parts {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(bytes)?;
        }
        let mut buf = writer.finish()?;
        buf.flush()?;
        let size = buf
            .into_inner()
            .map_err(|e| SeqstoreError::Io(e.into_error()))?
            .metadata()?
            .len();
        debug!("spiral create: wrote {} ({} bytes)", dest.display(), size);
        Ok(size)
    }

    /// Freeze the archive into an in-memory storage.
    pub fn close_mem(self) -> Result<MemStorage> {
        let info = self.file_info();
        let mut parts = self.parts.into_inner().unwrap();
        parts.insert(FILE_INFO.to_string(), serde_json::to_vec_pretty(&info)?);
        Ok(MemStorage {
            parts: parts.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        })
    }
}

/// A handle scoped to one part prefix of an archive under construction.
pub struct CreateState<'a> {
    file: &'a SpiralCreate,
    prefix: String,
}

impl CreateState<'_> {
    /// Record the version of the component rooted at this prefix.
    pub fn set_version(&self, version: ProductVersion) -> Result<()> {
        self.create_json(
            PART_INFO,
            &PartInfo {
                version: version.0.to_string(),
            },
        )
    }

    /// Serialize `value` as a JSON part.
    pub fn create_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.file.insert(join(&self.prefix, name), bytes);
        Ok(())
    }

    /// Register a raw byte part.
    pub fn put_part(&self, name: &str, bytes: Vec<u8>) {
        self.file.insert(join(&self.prefix, name), bytes);
    }

    /// A nested creation state.
    pub fn subpart(&self, name: &str) -> CreateState<'_> {
        CreateState {
            file: self.file,
            prefix: join(&self.prefix, name),
        }
    }

    pub fn uuid(&self) -> &str {
        self.file.uuid()
    }
}

/// Options for opening an archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpiralOpenOptions {
    /// Read every part into a private RAM buffer instead of handing out mmap
    /// views.
    pub read_into_ram: bool,
}

#[derive(Clone)]
enum PartData {
    Mapped {
        map: Arc<Mmap>,
        offset: usize,
        len: usize,
    },
    Owned(Arc<Vec<u8>>),
}

struct OpenInner {
    parts: BTreeMap<String, PartData>,
    file_info: FileInfo,
}

/// An archive opened for reading.
pub struct SpiralOpen {
    inner: Arc<OpenInner>,
}

impl SpiralOpen {
    /// Open a spiral file from disk, memory-mapping its parts.
    pub fn mmap<P: AsRef<Path>>(path: P, options: SpiralOpenOptions) -> Result<SpiralOpen> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut locations = BTreeMap::new();
        {
            let mut archive = ZipArchive::new(&file)?;
            for i in 0..archive.len() {
                let entry = archive.by_index(i)?;
                if entry.compression() != CompressionMethod::Stored
                    || entry.compressed_size() != entry.size()
                {
                    return Err(SeqstoreError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!(
                            "{}: member {} is compressed; spiral files must be store-only",
                            path.display(),
                            entry.name()
                        ),
                    )));
                }
                locations.insert(
                    entry.name().to_string(),
                    (entry.data_start() as usize, entry.size() as usize),
                );
            }
        }
        // Safety: the file is opened read-only and spiral archives are
        // immutable once written.
        let map = Arc::new(unsafe { Mmap::map(&file)? });
        let mut parts = BTreeMap::new();
        for (name, (offset, len)) in locations {
            let data = if options.read_into_ram {
                PartData::Owned(Arc::new(map[offset..offset + len].to_vec()))
            } else {
                PartData::Mapped {
                    map: Arc::clone(&map),
                    offset,
                    len,
                }
            };
            parts.insert(name, data);
        }
        debug!(
            "spiral open: {} ({} parts{})",
            path.display(),
            parts.len(),
            if options.read_into_ram { ", in RAM" } else { "" }
        );
        Self::finish_open(parts)
    }

    /// Open an in-memory archive produced by [`SpiralCreate::close_mem`].
    pub fn from_mem(storage: MemStorage) -> Result<SpiralOpen> {
        let parts = storage
            .parts
            .into_iter()
            .map(|(name, bytes)| (name, PartData::Owned(bytes)))
            .collect();
        Self::finish_open(parts)
    }

    fn finish_open(parts: BTreeMap<String, PartData>) -> Result<SpiralOpen> {
        let info_buf = match parts.get(FILE_INFO) {
            Some(data) => part_membuf(data),
            None => {
                return Err(SeqstoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "archive has no file_info.json",
                )))
            }
        };
        let file_info: FileInfo = serde_json::from_slice(&info_buf)?;
        Ok(SpiralOpen {
            inner: Arc::new(OpenInner { parts, file_info }),
        })
    }

    pub fn uuid(&self) -> &str {
        &self.inner.file_info.uuid
    }

    pub fn file_info(&self) -> &FileInfo {
        &self.inner.file_info
    }

    /// The root open state.
    pub fn open(&self) -> OpenState {
        OpenState {
            inner: Arc::clone(&self.inner),
            prefix: String::new(),
        }
    }

    /// All part names, for diagnostics.
    pub fn contents(&self) -> Vec<String> {
        self.inner.parts.keys().cloned().collect()
    }
}

fn part_membuf(data: &PartData) -> MemBuf {
    match data {
        PartData::Mapped { map, offset, len } => MemBuf::from_mmap(Arc::clone(map), *offset, *len),
        PartData::Owned(bytes) => MemBuf::from_arc(Arc::clone(bytes)),
    }
}

/// A handle scoped to one part prefix of an opened archive.
#[derive(Clone)]
pub struct OpenState {
    inner: Arc<OpenInner>,
    prefix: String,
}

impl OpenState {
    /// Fail unless the stored major version of this component is at most
    /// `version`'s major.
    pub fn enforce_max_version(&self, what: &str, version: ProductVersion) -> Result<()> {
        let info: PartInfo = self.open_json(PART_INFO).map_err(|_| {
            SeqstoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}: missing part_info.json", what),
            ))
        })?;
        let stored_major = parse_major(&info.version).ok_or_else(|| {
            SeqstoreError::Version(format!(
                "{}: unparseable stored version {:?}",
                what, info.version
            ))
        })?;
        if stored_major > version.major() {
            return Err(SeqstoreError::Version(format!(
                "{} was written with version {} but this build only understands up to {}",
                what, info.version, version.0
            )));
        }
        Ok(())
    }

    pub fn open_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let buf = self.open_part(name)?;
        Ok(serde_json::from_slice(&buf)?)
    }

    pub fn open_part(&self, name: &str) -> Result<MemBuf> {
        let path = join(&self.prefix, name);
        match self.inner.parts.get(&path) {
            Some(data) => Ok(part_membuf(data)),
            None => Err(SeqstoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("archive has no part {:?}", path),
            ))),
        }
    }

    pub fn part_present(&self, name: &str) -> bool {
        self.inner.parts.contains_key(&join(&self.prefix, name))
    }

    /// Does a nested part exist under `name`?
    pub fn subpart_present(&self, name: &str) -> bool {
        let prefix = format!("{}/", join(&self.prefix, name));
        self.inner
            .parts
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    pub fn subpart(&self, name: &str) -> OpenState {
        OpenState {
            inner: Arc::clone(&self.inner),
            prefix: join(&self.prefix, name),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.inner.file_info.uuid
    }
}
