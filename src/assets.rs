//! Template asset resolution
//!
//! Meshes are addressed by symbolic keys and mapped to local files by an
//! injected [`AssetResolver`]. [`DirectoryResolver`] reads a TemplateFlow-style
//! directory tree.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Cortical hemisphere
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hemisphere {
    #[serde(rename = "L")]
    Left,
    #[serde(rename = "R")]
    Right,
}

impl Hemisphere {
    /// Single-letter tag used in file names.
    pub fn tag(self) -> &'static str {
        match self {
            Hemisphere::Left => "L",
            Hemisphere::Right => "R",
        }
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Symbolic address of a template file
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetKey {
    pub template: String,
    pub space: Option<String>,
    pub hemisphere: Option<Hemisphere>,
    pub density: Option<String>,
    pub desc: Option<String>,
    pub suffix: String,
}

const SURFACE_TEMPLATE: &str = "fsLR";
const SURFACE_DENSITY: &str = "32k";

impl AssetKey {
    /// Registration sphere of the 32k fsLR surface.
    pub fn sphere(hemi: Hemisphere) -> Self {
        Self {
            template: SURFACE_TEMPLATE.to_string(),
            space: Some("fsaverage".to_string()),
            hemisphere: Some(hemi),
            density: Some(SURFACE_DENSITY.to_string()),
            desc: None,
            suffix: "sphere".to_string(),
        }
    }

    /// Vertex-area-averaged midthickness of the 32k fsLR surface.
    pub fn midthickness(hemi: Hemisphere) -> Self {
        Self {
            template: SURFACE_TEMPLATE.to_string(),
            space: None,
            hemisphere: Some(hemi),
            density: Some(SURFACE_DENSITY.to_string()),
            desc: Some("vaavg".to_string()),
            suffix: "midthickness".to_string(),
        }
    }

    /// `tpl-<template>[_space-..][_hemi-..][_den-..][_desc-..]_<suffix>.surf.gii`
    pub fn file_name(&self) -> String {
        let mut name = format!("tpl-{}", self.template);
        if let Some(space) = &self.space {
            name.push_str(&format!("_space-{}", space));
        }
        if let Some(hemi) = self.hemisphere {
            name.push_str(&format!("_hemi-{}", hemi));
        }
        if let Some(den) = &self.density {
            name.push_str(&format!("_den-{}", den));
        }
        if let Some(desc) = &self.desc {
            name.push_str(&format!("_desc-{}", desc));
        }
        name.push_str(&format!("_{}.surf.gii", self.suffix));
        name
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Maps symbolic keys to local files.
pub trait AssetResolver: Send + Sync {
    /// Fails with `TemplateNotFound` when the asset is unavailable.
    fn resolve(&self, key: &AssetKey) -> Result<PathBuf>;
}

/// Resolver over a local TemplateFlow-style directory
#[derive(Clone, Debug)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path the key maps to, whether or not it exists.
    pub fn path_for(&self, key: &AssetKey) -> PathBuf {
        self.root.join(format!("tpl-{}", key.template)).join(key.file_name())
    }
}

impl AssetResolver for DirectoryResolver {
    fn resolve(&self, key: &AssetKey) -> Result<PathBuf> {
        let path = self.path_for(key);
        if path.is_file() {
            log::debug!("resolved {} -> {}", key, path.display());
            Ok(path)
        } else {
            Err(Error::TemplateNotFound { key: key.to_string() })
        }
    }
}
