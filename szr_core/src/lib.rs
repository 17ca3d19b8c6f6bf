//! Error-bounded lossy compression of 3-D `f32` volumes.
//!
//! The volume is cut into 6x6x6 blocks. Each block is predicted either by a
//! fitted plane or by the Lorenzo neighbor predictor, residuals are
//! quantized under an absolute error bound (escaping to raw storage where
//! the bound cannot be met), and the symbols are Huffman coded into a
//! self-describing SZRB container.

pub mod bitmap;
pub mod codec;
pub mod coefficients;
pub mod config;
pub mod error;
pub mod format;
pub mod huffman;
pub mod partition;
pub mod quantizer;
pub mod reader;
pub mod regression;
pub mod selector;
pub mod tuning;
pub mod writer;

pub use codec::Codec;
pub use config::{SizeType, SzConfig};
pub use error::{Result, SzError};
pub use format::{max_container_size, ContainerBound, Header, HEADER_SIZE, MAGIC};
pub use partition::{Dims, BLOCK_ELEMENTS, BLOCK_SIZE};
pub use reader::{decompress, Reader, SectionSizes};
pub use selector::PredictorKind;
pub use writer::{compress, Writer};
