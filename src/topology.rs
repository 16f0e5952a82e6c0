//! Organizing processes as communicators
//!
//! All processes partaking in a computation are organized in a communicator, which a runtime
//! hands out: `LocalUniverse` gives every rank thread a `LocalCommunicator`, the system MPI
//! library gives `Universe::world()`. Processes are addressed via their `Rank` within the
//! communicator. A `Process` bundles a communicator with a rank and is the receiver of all rooted
//! collective operations.

use std::os::raw::c_int;

use crate::raw::RawCommunicator;

/// Topology traits
pub mod traits {
    pub use super::{AsCommunicator, Communicator};
}

/// Identifies a certain process within a communicator.
pub type Rank = c_int;

/// Something that has a communicator associated with it
pub trait AsCommunicator {
    /// The type of the associated communicator
    type Out: Communicator;
    /// Returns the associated communicator.
    fn as_communicator(&self) -> &Self::Out;
}

/// Communicators are contexts for communication
pub trait Communicator: RawCommunicator {
    /// Bundles a reference to this communicator with a specific `Rank` into a `Process`.
    ///
    /// The rank is not validated here, a rooted collective on a rank outside `0..size()` fails
    /// with `Error::Root`.
    ///
    /// # Examples
    /// See `demos/broadcast.rs`
    fn process_at_rank(&self, r: Rank) -> Process<'_, Self>
    where
        Self: Sized,
    {
        Process { comm: self, rank: r }
    }

    /// A `Process` for the calling process
    fn this_process(&self) -> Process<'_, Self>
    where
        Self: Sized,
    {
        let rank = self.rank();
        Process { comm: self, rank }
    }
}

impl<C: RawCommunicator + ?Sized> Communicator for C {}

/// A process is identified by its rank within a communicator.
pub struct Process<'a, C>
where
    C: 'a + Communicator,
{
    comm: &'a C,
    rank: Rank,
}

impl<'a, C> Process<'a, C>
where
    C: 'a + Communicator,
{
    /// The process rank
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Whether this is the calling process
    pub fn is_self(&self) -> bool {
        self.rank == self.comm.rank()
    }
}

impl<'a, C> AsCommunicator for Process<'a, C>
where
    C: 'a + Communicator,
{
    type Out = C;
    fn as_communicator(&self) -> &Self::Out {
        self.comm
    }
}
