#![warn(missing_docs)]
#![warn(trivial_numeric_casts)]
#![warn(unused_extern_crates)]
#![warn(unused_import_braces)]

//! Strongly-typed collective communication
//!
//! Message-passing runtimes such as [MPI] move untyped data: a start address, a number of
//! elements and a tag naming the element type, combined under a handle naming the reduction
//! operation. This library maps Rust types and operation tags onto that triplet at compile time
//! and exposes the collective operations (broadcast, gather, scatter, reduce, all-reduce, scan
//! and all-to-all) with typed arguments and results.
//!
//! [MPI]: http://www.mpi-forum.org
//!
//! # Usage
//!
//! Add the `collectives` crate as a dependency in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! collectives = "0.1"
//! ```
//!
//! Then use it in your program like this:
//!
//! ```
//! use collectives::traits::*;
//! use collectives::collective::Sum;
//!
//! let results = collectives::local::run(4, |world| {
//!     let x = (world.rank() + 1) * 10;
//!     let total = world.all_reduce(&x, Sum)?;
//!     let prefix = world.scan(&x, Sum)?;
//!     Ok::<_, collectives::Error>((total, prefix))
//! });
//!
//! let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();
//! assert_eq!(results, vec![(100, 10), (100, 30), (100, 60), (100, 100)]);
//! ```
//!
//! # Runtimes
//!
//! The collectives are implemented on top of `raw::RawCommunicator`, the untyped primitive set of
//! a runtime. Two runtimes are included:
//!
//! - `local`: every rank is a thread of the calling process, messages travel over channels. Used
//!   for single-machine parallelism and for testing.
//! - `environment` (feature `mpi`): the system MPI library, linked through `mpi-sys`.
//!
//! # Features
//!
//! - `derive`: `#[derive(Equivalence)]` for structs whose fields share one element type
//! - `complex`: `num_complex::Complex<f32>` and `Complex<f64>` as element types
//! - `mpi`: the system MPI runtime, cannot be combined with `complex`

#[cfg(all(feature = "mpi", feature = "complex"))]
compile_error!(
    "features `mpi` and `complex` cannot be combined: the MPI bindings have no complex datatypes"
);

pub mod collective;
pub mod datatype;
#[cfg(feature = "mpi")]
pub mod environment;
pub mod error;
pub mod local;
pub mod raw;
pub mod topology;

/// Re-exports all traits.
pub mod traits {
    pub use crate::collective::traits::*;
    pub use crate::datatype::traits::*;
    pub use crate::raw::traits::*;
    pub use crate::topology::traits::*;

    #[cfg(feature = "derive")]
    pub use collectives_derive::Equivalence;
}

#[doc(inline)]
pub use crate::error::{Error, ErrorKind, Result};

#[cfg(feature = "mpi")]
#[doc(inline)]
pub use crate::environment::{initialize, initialize_with_threading, Threading};

#[cfg(feature = "derive")]
pub use collectives_derive::Equivalence;

/// Encodes number of values in multi-value messages.
pub type Count = std::os::raw::c_int;
