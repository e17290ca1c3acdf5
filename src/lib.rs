//! CTC alignment collapse over LoD-segmented token batches.
//!
//! ```
//! use ctcalign::collapse;
//!
//! let out = collapse(&[0, 1, 2, 2, 0, 4, 0, 4, 5, 0, 6], &[0, 11], 0, true).unwrap();
//! assert_eq!(out.tokens, vec![1, 2, 4, 4, 5, 6]);
//! assert_eq!(out.boundaries, vec![0, 6]);
//! ```
pub mod align;
pub mod codec;
pub mod config;
pub mod error;
pub mod lod;
pub mod tensor;

pub use align::{collapse, collapse_segment, collapse_with, ctc_align, Collapsed, Token};
pub use config::AlignConfig;
pub use error::{Error, Result};
pub use lod::Lod;
pub use tensor::LodTensor;
