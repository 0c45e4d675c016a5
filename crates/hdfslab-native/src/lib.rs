//! # hdfslab-native
//!
//! A pure-Rust HDF5 library with an id-based API in the style of the HDF5
//! C library: files hold groups, n-dimensional datasets, attributes, soft
//! links and external links; datasets may be chunked, extendible and
//! deflate-compressed.
//!
//! Files are read and written in the HDF5 on-disk format: a version 2
//! superblock, version 2 object headers with link messages, version 1
//! B-trees for chunk indexes and global heap collections for
//! variable-length data. Older files using symbol-table groups and
//! version 1 object headers can be read.
//!
//! Objects are opened through a [`Library`] and addressed by [`Hid`]
//! integers that must be closed explicitly.

pub mod btree;
pub mod checksum;
pub mod dataspace;
pub mod datatype;
pub mod disk;
pub mod error;
pub mod file_image;
pub mod file_reader;
pub mod file_writer;
pub mod filters;
pub mod heap;
pub mod io;
pub mod library;
pub mod messages;
pub mod object;
pub mod object_header;
pub mod property_list;
pub mod selection;
pub mod storage;
pub mod superblock;

pub use dataspace::{Dataspace, DataspaceType, UNLIMITED};
pub use datatype::{CharacterSet, CompoundMember, Datatype, StringPadding, TypeClass};
pub use error::NativeError;
pub use library::{Hid, Library};
pub use object::ObjectKind;
pub use property_list::{AccessMode, DatasetCreateProps, FileAccessProps};
pub use selection::Selection;
pub use superblock::SIGNATURE;
