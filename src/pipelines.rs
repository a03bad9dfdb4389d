//! File-to-file entry points
//!
//! Each call reads its input through the matrix adapter, runs one engine
//! and writes a single derived file, returning its path.

use std::path::{Path, PathBuf};

use crate::alff::compute_alff;
use crate::assets::{AssetKey, AssetResolver, Hemisphere};
use crate::config::{AlffParams, ReadOptions, WriteOptions};
use crate::error::Result;
use crate::io::gifti::write_gifti_map;
use crate::io::{read_matrix, write_matrix, DataFormat, OutputData};
use crate::mesh::AdjacencyCache;
use crate::reho::compute_reho;

/// Compound suffixes stripped before `suffix` is appended, longest first.
const KNOWN_SUFFIXES: [&str; 8] = [
    ".dtseries.nii",
    ".dscalar.nii",
    ".func.gii",
    ".shape.gii",
    ".surf.gii",
    ".nii.gz",
    ".nii",
    ".gii",
];

/// `out_dir/<stem><suffix>` where `<stem>` is `in_file`'s name without its
/// format suffix (or without its last extension when none is recognized).
pub fn derived_path(in_file: &Path, out_dir: &Path, suffix: &str) -> PathBuf {
    let name = in_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_ascii_lowercase();

    let stem = match KNOWN_SUFFIXES.iter().find(|s| lower.ends_with(*s)) {
        Some(s) => &name[..name.len() - s.len()],
        None => in_file.file_stem().and_then(|s| s.to_str()).unwrap_or(&name),
    };
    out_dir.join(format!("{}{}", stem, suffix))
}

/// Surface ReHo for one hemisphere.
///
/// The GIFTI series is scored over the hemisphere's template adjacency and
/// written as `<stem>.shape.gii` carrying the midthickness template's
/// file-level metadata.
pub fn surface_reho<R: AssetResolver>(
    surf_bold: &Path,
    hemi: Hemisphere,
    cache: &AdjacencyCache<R>,
    out_dir: &Path,
) -> Result<PathBuf> {
    let data = read_matrix(surf_bold, None, &ReadOptions::default())?;
    let adjacency = cache.get(hemi)?;
    let reho = compute_reho(data.view(), &adjacency)?;

    let template = cache.resolver().resolve(&AssetKey::midthickness(hemi))?;
    let out = derived_path(surf_bold, out_dir, ".shape.gii");
    write_gifti_map(&OutputData::Map(reho), &template, &out)?;
    log::info!("wrote {} ReHo map {}", hemi, out.display());
    Ok(out)
}

/// ALFF of a CIFTI, NIfTI or GIFTI series, written next to `out_dir` as
/// `<stem>_alff` plus the format's extension.
pub fn compute_alff_file(
    in_file: &Path,
    mask: Option<&Path>,
    params: &AlffParams,
    out_dir: &Path,
) -> Result<PathBuf> {
    let format = DataFormat::detect(in_file)?;
    let data = read_matrix(in_file, mask, &ReadOptions::default())?;
    let alff = compute_alff(data.view(), params)?;

    let out = derived_path(in_file, out_dir, &format!("_alff{}", format.output_extension()));
    write_matrix(alff.view().into_dyn(), in_file, &out, mask, &WriteOptions::with_tr(params.tr))?;
    log::info!("wrote ALFF map {}", out.display());
    Ok(out)
}
