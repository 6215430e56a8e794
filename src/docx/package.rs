use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::docx::format::is_xml_part_name;
use crate::docx::tree::XmlTree;
use crate::error::{DocxError, DocxResult, IoContext};

pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
pub const DOCUMENT_PART: &str = "word/document.xml";
pub const COMMENTS_PART: &str = "word/comments.xml";
pub const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";

pub const DEFAULT_COMPRESSION_LEVEL: i64 = 6;

/// Whole archive held in memory, for read-only flows.
pub struct DocxPackage {
    pub entries: Vec<DocxEntry>,
}

pub struct DocxEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub is_dir: bool,
}

impl DocxPackage {
    /// Reads every entry to the end, which makes the zip reader check each CRC.
    pub fn read(path: &Path) -> DocxResult<Self> {
        let f = File::open(path).at(path)?;
        let mut zip = ZipArchive::new(f).map_err(|e| DocxError::corrupt(path, e))?;
        let mut entries = Vec::new();
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).map_err(|e| DocxError::corrupt(path, e))?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| DocxError::corrupt(path, format!("{}: {e}", file.name())))?;
            entries.push(DocxEntry {
                name: file.name().to_string(),
                data,
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| !e.is_dir && e.name == name)
            .map(|e| e.data.as_slice())
    }

    pub fn require(&self, name: &str) -> DocxResult<&[u8]> {
        self.get(name)
            .ok_or_else(|| DocxError::PartNotFound(name.to_string()))
    }

    pub fn part_tree(&self, name: &str) -> DocxResult<Option<XmlTree>> {
        self.get(name).map(|b| XmlTree::parse(name, b)).transpose()
    }
}

/// An archive expanded into a private scratch directory next to it.
#[derive(Debug)]
pub struct ScratchPackage {
    dir: TempDir,
}

impl ScratchPackage {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn part_path(&self, name: &str) -> PathBuf {
        let mut p = self.dir.path().to_path_buf();
        for seg in name.split('/').filter(|s| !s.is_empty()) {
            p.push(seg);
        }
        p
    }

    pub fn has_part(&self, name: &str) -> bool {
        self.part_path(name).is_file()
    }

    pub fn read_part(&self, name: &str) -> DocxResult<Option<Vec<u8>>> {
        let path = self.part_path(name);
        match fs::read(&path) {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DocxError::io(&path, e)),
        }
    }

    /// Removes the scratch directory now instead of on drop, surfacing io errors.
    pub fn close(self) -> DocxResult<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().at(&path)
    }
}

fn sibling_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Decompresses every entry of `archive_path` into a fresh scratch directory.
pub fn extract(archive_path: &Path) -> DocxResult<ScratchPackage> {
    let f = File::open(archive_path).at(archive_path)?;
    let mut zip = ZipArchive::new(f).map_err(|e| DocxError::corrupt(archive_path, e))?;

    let file_name = archive_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "docx".to_string());
    let parent = sibling_dir(archive_path);
    let dir = tempfile::Builder::new()
        .prefix(&format!("{file_name}_extract_"))
        .tempdir_in(parent)
        .at(parent)?;

    for i in 0..zip.len() {
        let mut file = zip
            .by_index(i)
            .map_err(|e| DocxError::corrupt(archive_path, e))?;
        let rel = file.enclosed_name().ok_or_else(|| {
            DocxError::corrupt(archive_path, format!("unsafe entry name: {}", file.name()))
        })?;
        let out_path = dir.path().join(rel);
        if file.is_dir() {
            fs::create_dir_all(&out_path).at(&out_path)?;
            continue;
        }
        if let Some(p) = out_path.parent() {
            fs::create_dir_all(p).at(p)?;
        }
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data).map_err(|e| {
            DocxError::corrupt(archive_path, format!("{}: {e}", file.name()))
        })?;
        fs::write(&out_path, &data).at(&out_path)?;
    }
    debug!(
        "extracted {} entries of {} into {}",
        zip.len(),
        archive_path.display(),
        dir.path().display()
    );

    Ok(ScratchPackage { dir })
}

/// Relative, forward-slash names of every file below `dir`, `[Content_Types].xml` first.
fn entry_names(dir: &Path) -> DocxResult<Vec<(String, PathBuf)>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| DocxError::io(dir, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| DocxError::io(entry.path(), io::Error::new(io::ErrorKind::Other, e)))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        names.push((name, entry.path().to_path_buf()));
    }
    names.sort_by(|(a, _), (b, _)| {
        (a != CONTENT_TYPES_PART)
            .cmp(&(b != CONTENT_TYPES_PART))
            .then_with(|| a.cmp(b))
    });
    Ok(names)
}

/// Writes every file under `scratch_dir` into a new archive that replaces `archive_path`.
pub fn repack(scratch_dir: &Path, archive_path: &Path, level: i64) -> DocxResult<usize> {
    let names = entry_names(scratch_dir)?;
    let parent = sibling_dir(archive_path);
    let mut tmp = tempfile::Builder::new()
        .prefix(".repack")
        .tempfile_in(parent)
        .at(parent)?;

    let opts = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(level));
    {
        let mut zout = ZipWriter::new(tmp.as_file_mut());
        for (name, path) in &names {
            let data = fs::read(path).at(path)?;
            zout.start_file(name.as_str(), opts)
                .map_err(|e| DocxError::io(path, io::Error::new(io::ErrorKind::Other, e)))?;
            zout.write_all(&data).at(path)?;
        }
        zout.finish()
            .map_err(|e| DocxError::io(archive_path, io::Error::new(io::ErrorKind::Other, e)))?;
    }
    tmp.as_file().sync_all().at(tmp.path())?;
    tmp.persist(archive_path)
        .map_err(|e| DocxError::io(archive_path, e.error))?;
    debug!("repacked {} entries into {}", names.len(), archive_path.display());
    Ok(names.len())
}

#[derive(Clone, Debug, Default)]
pub struct ArchiveSummary {
    /// SHA-256 of every file entry, keyed by entry name.
    pub digests: BTreeMap<String, String>,
    pub xml_parts: usize,
}

/// Full integrity check: CRC of every entry plus a parse of every XML part.
pub fn verify_archive(path: &Path) -> DocxResult<ArchiveSummary> {
    let pkg = DocxPackage::read(path)?;
    let mut summary = ArchiveSummary::default();
    for ent in pkg.entries.iter().filter(|e| !e.is_dir) {
        if is_xml_part_name(&ent.name) {
            XmlTree::parse(&ent.name, &ent.data)
                .map_err(|e| DocxError::corrupt(path, e))?;
            summary.xml_parts += 1;
        }
        summary.digests.insert(ent.name.clone(), sha256_hex(&ent.data));
    }
    Ok(summary)
}

/// SHA-256 of every non-XML file in an extracted package, keyed by entry name.
pub fn binary_digests(dir: &Path) -> DocxResult<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for (name, path) in entry_names(dir)? {
        if is_xml_part_name(&name) {
            continue;
        }
        let data = fs::read(&path).at(&path)?;
        out.insert(name, sha256_hex(&data));
    }
    Ok(out)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
