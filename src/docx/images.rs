use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::docx::html::ImageRef;
use crate::docx::package::{sha256_hex, DocxPackage, DOCUMENT_RELS_PART};
use crate::docx::rels::{image_relationships, Relationship};
use crate::error::{DocxResult, IoContext};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExtractedImage {
    pub rel_id: String,
    /// Base name of the part inside the package.
    pub filename: String,
    pub path: PathBuf,
    pub content_type: String,
}

impl ExtractedImage {
    pub fn as_ref_for_html(&self) -> ImageRef {
        ImageRef {
            src: self
                .path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            alt: self.filename.clone(),
        }
    }
}

pub fn content_type_for(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        _ => "image/png",
    }
}

/// Package entry name of a relationship target in `word/_rels/document.xml.rels`.
pub fn target_part(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None => {
            let mut parts: Vec<&str> = vec!["word"];
            for seg in target.split('/') {
                match seg {
                    "" | "." => {}
                    ".." => {
                        parts.pop();
                    }
                    s => parts.push(s),
                }
            }
            parts.join("/")
        }
    }
}

pub fn package_images(pkg: &DocxPackage) -> DocxResult<Vec<Relationship>> {
    match pkg.part_tree(DOCUMENT_RELS_PART)? {
        Some(rels) => image_relationships(&rels),
        None => Ok(Vec::new()),
    }
}

/// Copies every image relationship target of `pkg` into `dest_dir`.
///
/// Stored names are prefixed with a content hash, so re-extracting the same document
/// overwrites rather than duplicates. Relationships whose target is missing are skipped.
pub fn extract_package_images(pkg: &DocxPackage, dest_dir: &Path) -> DocxResult<Vec<ExtractedImage>> {
    let rels = package_images(pkg)?;
    if rels.is_empty() {
        return Ok(Vec::new());
    }
    fs::create_dir_all(dest_dir).at(dest_dir)?;

    let mut out = Vec::new();
    for rel in rels {
        let part = target_part(&rel.target);
        let Some(data) = pkg.get(&part) else {
            warn!("image {} targets missing part {part}", rel.id);
            continue;
        };
        let filename = part.rsplit('/').next().unwrap_or(part.as_str()).to_string();
        let ext = Path::new(&filename)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let digest = sha256_hex(data);
        let path = dest_dir.join(format!("{}_{filename}", &digest[..8]));
        fs::write(&path, data).at(&path)?;
        out.push(ExtractedImage {
            rel_id: rel.id,
            filename,
            path,
            content_type: content_type_for(&ext).to_string(),
        });
    }
    info!("extracted {} images into {}", out.len(), dest_dir.display());
    Ok(out)
}

pub fn extract_images(archive: &Path, dest_dir: &Path) -> DocxResult<Vec<ExtractedImage>> {
    let pkg = DocxPackage::read(archive)?;
    extract_package_images(&pkg, dest_dir)
}

pub fn image_refs(images: &[ExtractedImage]) -> HashMap<String, ImageRef> {
    images
        .iter()
        .map(|i| (i.rel_id.clone(), i.as_ref_for_html()))
        .collect()
}
