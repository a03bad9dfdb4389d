//! Error types for matrix I/O, asset resolution and the engines.
//!
//! Numeric degeneracies (empty spectral bands, single-member neighbourhoods)
//! are deliberately absent: they surface as NaN in the output arrays.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong in a read, write or engine call.
#[derive(Error, Debug)]
pub enum Error {
    /// A volumetric series was read or written without a binary mask
    #[error("a binary mask must be provided for volumetric (NIfTI) data")]
    MissingMask,

    /// The file name does not carry a supported extension
    #[error("unsupported file format: {}", path.display())]
    UnsupportedFormat {
        /// Offending path
        path: PathBuf,
    },

    /// Matrix rank outside {1, 2}
    #[error("input data must be a 1-D or 2-D array, not {ndim}-D")]
    Dimensionality {
        /// Rank that was supplied
        ndim: usize,
    },

    /// A parameter failed validation
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Two inputs that must agree in shape do not
    #[error("{what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// What was being compared
        what: &'static str,
        /// Expected shape
        expected: Vec<usize>,
        /// Shape that was found
        found: Vec<usize>,
    },

    /// A mesh or atlas asset could not be located
    #[error("template asset not found: {key}")]
    TemplateNotFound {
        /// Human-readable form of the asset key
        key: String,
    },

    /// Binary header could not be decoded
    #[error("invalid header in {}: {reason}", path.display())]
    InvalidHeader {
        /// File being decoded
        path: PathBuf,
        /// What was wrong
        reason: String,
    },

    /// On-disk element type is not supported
    #[error("unsupported data type {code}")]
    UnsupportedDatatype {
        /// NIfTI datatype code or GIFTI type name
        code: String,
    },

    /// CIFTI XML is structurally invalid
    #[error("malformed CIFTI XML: {0}")]
    MalformedXml(String),

    /// GIFTI document is structurally invalid
    #[error("malformed GIFTI file: {0}")]
    MalformedGifti(String),

    /// Filesystem error, propagated unmodified
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error from the NIfTI-1 reader/writer
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),

    /// XML tokenizer error
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    /// XML deserialization error
    #[error(transparent)]
    XmlDe(#[from] quick_xml::DeError),

    /// Base64 payload could not be decoded
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    /// Delimited text error
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    /// True for failures caused by caller misuse (bad paths, ranks, params).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::MissingMask
                | Error::UnsupportedFormat { .. }
                | Error::Dimensionality { .. }
                | Error::InvalidParameter { .. }
                | Error::ShapeMismatch { .. }
        )
    }

    /// True when an external asset (mesh, atlas) is unavailable.
    pub fn is_resource_not_found(&self) -> bool {
        matches!(self, Error::TemplateNotFound { .. })
    }
}
