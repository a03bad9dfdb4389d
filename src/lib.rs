//! boldpost: numeric cores for fMRI post-processing
//!
//! Regional homogeneity on cortical surfaces, amplitude of low-frequency
//! fluctuation, and atlas-based functional connectivity, over time series
//! read from NIfTI, CIFTI and GIFTI files as location-by-time matrices.
//!
//! # Modules
//! - `io`: matrix adapter for NIfTI-1, CIFTI-2, GIFTI and TSV files
//! - `assets`: template lookup by symbolic key
//! - `mesh`: surface adjacency and its per-hemisphere cache
//! - `reho`: Kendall's W over mesh neighbourhoods
//! - `alff`: band-averaged spectral amplitude
//! - `connectivity`: region means and Pearson correlation
//! - `pipelines`: file-to-file entry points
//! - `config`, `error`: parameters and the error type

pub mod error;
pub mod config;

pub mod io;
pub mod assets;
pub mod mesh;

pub mod reho;
pub mod alff;
pub mod connectivity;
pub mod pipelines;

#[cfg(feature = "wasm")]
pub mod wasm;

pub use alff::compute_alff;
pub use assets::{AssetKey, AssetResolver, DirectoryResolver, Hemisphere};
pub use config::{AlffParams, ReadOptions, SpectralBand, WriteOptions};
pub use connectivity::{correlation_matrix, extract_timeseries, extract_timeseries_funct, Connectivity};
pub use error::{Error, Result};
pub use io::{read_matrix, rescale, write_matrix, DataFormat, FormatDescriptor, OutputData};
pub use mesh::{mesh_adjacency, AdjacencyCache, AdjacencyMatrix};
pub use pipelines::{compute_alff_file, derived_path, surface_reho};
pub use reho::compute_reho;
