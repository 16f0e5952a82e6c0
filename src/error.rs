//! Error handling
//!
//! Errors are reported by the runtime underneath a communicator and handed to the caller
//! unchanged. Neither the typed layer nor the runtimes attempt recovery: a collective that failed
//! on one rank leaves the communicator unusable, mirroring the fatal default error handler of MPI.
//!
//! Every `Error` belongs to one of the error classes in `ErrorKind`, which are named after the MPI
//! error classes (MPI 4.0, section 9.4).

use thiserror::Error;

use crate::collective::SystemOperation;
use crate::datatype::SystemDatatype;
use crate::raw::Collective;
use crate::topology::Rank;

/// Result type of all communicating operations
pub type Result<T> = std::result::Result<T, Error>;

/// Set of error classes that can be reported by a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid buffer pointer argument
    Buffer,
    /// Invalid communicator argument, or the communicator is no longer usable
    Comm,
    /// Invalid count argument
    Count,
    /// Internal runtime error
    Intern,
    /// Collective argument not identical on all processes, or collective routines called in a
    /// different order by different processes
    NotSame,
    /// Invalid operation argument
    Op,
    /// Known error not in this list
    Other,
    /// Invalid rank argument
    Rank,
    /// Invalid root argument
    Root,
    /// Message truncated on receive
    Truncate,
    /// Invalid datatype argument
    Type,
    /// Unknown error
    Unknown,
}

/// An error reported by a runtime during a collective operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The root of a rooted collective is not a member of the communicator.
    #[error("root rank {root} is not a member of a communicator of size {size}")]
    Root {
        /// The offending root rank
        root: Rank,
        /// Size of the communicator
        size: Rank,
    },
    /// A rank argument is not a member of the communicator.
    #[error("rank {rank} is not a member of a communicator of size {size}")]
    Rank {
        /// The offending rank
        rank: Rank,
        /// Size of the communicator
        size: Rank,
    },
    /// A buffer argument is missing or unusable for the collective, e.g. an in-place send on a
    /// rank that is not the root.
    #[error("invalid buffer: {0}")]
    Buffer(String),
    /// A count or length does not fit the collective, e.g. it exceeds the native count range or
    /// cannot be divided into equal blocks.
    #[error("invalid count: {0}")]
    Count(String),
    /// A peer contributed a different number of elements than the receiving side expected.
    #[error(
        "message from rank {peer} truncated: {expected} elements expected, {received} received"
    )]
    Truncate {
        /// Rank that sent the message
        peer: Rank,
        /// Number of elements the receive side had room for
        expected: usize,
        /// Number of elements that arrived
        received: usize,
    },
    /// A peer contributed elements of a different datatype.
    #[error("datatype mismatch with rank {peer}: {expected:?} expected, {received:?} received")]
    Type {
        /// Rank that sent the message
        peer: Rank,
        /// Datatype of the local buffer
        expected: SystemDatatype,
        /// Datatype of the message
        received: SystemDatatype,
    },
    /// A reduction operation is not defined on a datatype.
    #[error("operation {op:?} is not defined on {datatype:?}")]
    Op {
        /// The operation
        op: SystemOperation,
        /// The datatype it was applied to
        datatype: SystemDatatype,
    },
    /// Ranks entered different collective operations.
    #[error("collective mismatch with rank {peer}: entered {local:?}, peer entered {remote:?}")]
    NotSame {
        /// Rank that sent the message
        peer: Rank,
        /// Collective entered by this rank
        local: Collective,
        /// Collective entered by the peer
        remote: Collective,
    },
    /// A peer left the communicator, e.g. because its thread panicked.
    #[error("rank {0} disconnected from the communicator")]
    Disconnected(Rank),
    /// A peer failed a collective and aborted the communicator.
    #[error("communicator aborted after a failure on rank {0}")]
    Aborted(Rank),
    /// A call into the system MPI library returned an error code.
    #[cfg(feature = "mpi")]
    #[error("MPI call failed with error class {0:?}")]
    Mpi(ErrorKind),
}

impl Error {
    /// The error class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match *self {
            Error::Root { .. } => ErrorKind::Root,
            Error::Rank { .. } => ErrorKind::Rank,
            Error::Buffer(_) => ErrorKind::Buffer,
            Error::Count(_) => ErrorKind::Count,
            Error::Truncate { .. } => ErrorKind::Truncate,
            Error::Type { .. } => ErrorKind::Type,
            Error::Op { .. } => ErrorKind::Op,
            Error::NotSame { .. } => ErrorKind::NotSame,
            Error::Disconnected(_) | Error::Aborted(_) => ErrorKind::Comm,
            #[cfg(feature = "mpi")]
            Error::Mpi(kind) => kind,
        }
    }

    pub(crate) fn count<D: std::fmt::Display>(what: D) -> Error {
        Error::Count(what.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_classified() {
        assert_eq!(Error::Root { root: 4, size: 4 }.kind(), ErrorKind::Root);
        assert_eq!(Error::Aborted(2).kind(), ErrorKind::Comm);
        assert_eq!(Error::Disconnected(1).kind(), ErrorKind::Comm);
        assert_eq!(
            Error::Op {
                op: SystemOperation::BitwiseAnd,
                datatype: SystemDatatype::F64
            }
            .kind(),
            ErrorKind::Op
        );
    }

    #[test]
    fn messages_name_the_peer() {
        let err = Error::Truncate {
            peer: 3,
            expected: 2,
            received: 5,
        };
        assert_eq!(
            err.to_string(),
            "message from rank 3 truncated: 2 elements expected, 5 received"
        );
    }
}
