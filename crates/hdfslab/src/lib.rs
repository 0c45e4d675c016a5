//! Typed N-dimensional dataset I/O over HDF5 files.
//!
//! Native datatypes are resolved to a closed set of [`ElementKind`]s, data
//! moves as [`TypedArray`]s, and regions are described by [`ShapeSpec`]s.
//! Files are shared through a reference-counted [`HandleRegistry`].
//!
//! # Writing and appending
//!
//! ```no_run
//! use hdfslab::{CreateSpec, ElementKind, IoConfig, Session, TypeDescriptor, TypedArray};
//!
//! let session = Session::new(IoConfig::default());
//! let file = session.open("scan.h5", true).unwrap();
//! let io = session.datasets();
//!
//! io.create_dataset(
//!     &file,
//!     "/entry:NXentry/data:NXdata/counts",
//!     &TypeDescriptor::of(ElementKind::Float64),
//!     &CreateSpec::extendible(&[4]),
//! )
//! .unwrap();
//! for row in 0..3 {
//!     let base = (row * 4) as f64;
//!     let value = TypedArray::from_vec(vec![4], vec![base + 1.0, base + 2.0, base + 3.0, base + 4.0]).unwrap();
//!     io.append_row(&file, "/entry/data/counts", &value).unwrap();
//! }
//! session.close(file).unwrap();
//! ```
//!
//! # Reading a region
//!
//! ```no_run
//! use hdfslab::{ReadOptions, Session, ShapeSpec};
//!
//! let session = Session::default();
//! let file = session.open("scan.h5", false).unwrap();
//! let region = ShapeSpec::region(vec![1, 0], vec![2, 4]).unwrap();
//! let rows = session
//!     .datasets()
//!     .read_dataset(&file, "/entry/data/counts", Some(&region), ReadOptions::default())
//!     .unwrap();
//! println!("{:?}: {:?}", rows.shape(), rows.as_slice::<f64>());
//! session.close(file).unwrap();
//! ```

pub mod array;
pub mod attribute;
pub mod chunk;
mod codec;
pub mod config;
pub mod dataset;
pub mod error;
mod guard;
pub mod path;
pub mod registry;
pub mod session;
pub mod shape;
pub mod types;

pub use array::{ArrayData, Element, TypedArray};
pub use attribute::{AttributeIo, AttributeValue};
pub use chunk::ChunkEstimator;
pub use config::{ChunkStrategy, Compression, FailureKind, IoConfig};
pub use dataset::{CreateSpec, DatasetIo, DatasetShape, ReadOptions, BOOLEAN_ATTR, BOOLEAN_TAG};
pub use error::{Error, Result};
pub use path::{strip_classes, AugmentedPath, PathSegment, NX_CLASS};
pub use registry::{FileBackend, FileHandle, HandleRegistry};
pub use session::Session;
pub use shape::{needs_extension, reconcile_max_shape, to_hyperslab, Hyperslab, ShapeSpec};
pub use types::{ElementKind, ResolvedType, TypeDescriptor, TypeResolver, TypeTable};

pub use hdfslab_native::{Library, UNLIMITED};
