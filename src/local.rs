//! In-process runtime
//!
//! Runs every rank of a communicator as a thread of the calling process. Ranks are connected by
//! one FIFO channel per ordered pair of ranks. Every message carries an envelope naming the
//! collective it belongs to and the datatype of its elements. A rank that receives a message from
//! a different collective, of a different datatype or of a different length fails with
//! `Error::NotSame`, `Error::Type` or `Error::Truncate`. Mismatches are only detected when a
//! message flows: ranks that enter different collectives which both wait to receive, e.g. a
//! `reduce` on rank 0 and a `scan` on rank 1, block forever, as they would with MPI.
//!
//! ```
//! use collectives::traits::*;
//! use collectives::local::LocalUniverse;
//!
//! let universe = LocalUniverse::new(3);
//! let ranks = universe.run(|world| (world.rank(), world.size()));
//! assert_eq!(ranks, vec![(0, 3), (1, 3), (2, 3)]);
//! ```
//!
//! A runtime error on one rank is fatal for the communicator: the failing rank notifies all
//! peers, whose pending and future collectives fail with `Error::Aborted`. A rank whose thread
//! exits or panics while peers still wait for it makes them fail with `Error::Disconnected`.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use conv::ConvUtil;
use log::{debug, trace};
use once_cell::sync::Lazy;

use crate::collective::operation::reduce_bytes;
use crate::collective::SystemOperation;
use crate::datatype::{DynBuffer, DynBufferMut, Partition, SystemDatatype};
use crate::error::{Error, Result};
use crate::raw::{Collective, RawCommunicator, SendBuffer};
use crate::topology::{AsCommunicator, Rank};

/// Environment variable holding the number of ranks of `LocalUniverse::from_env()`
pub const NUM_RANKS_VAR: &str = "COLLECTIVES_NUM_RANKS";

static NUM_RANKS: Lazy<usize> = Lazy::new(|| {
    let configured = std::env::var(NUM_RANKS_VAR)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|&n| n > 0);
    configured.unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()))
});

enum Message {
    Data {
        collective: Collective,
        datatype: SystemDatatype,
        bytes: Vec<u8>,
    },
    Abort {
        origin: Rank,
    },
}

/// The communicator handed to each rank thread of a `LocalUniverse`
pub struct LocalCommunicator {
    rank: Rank,
    size: Rank,
    senders: Vec<Option<Sender<Message>>>,
    receivers: Vec<Option<Receiver<Message>>>,
    aborted: Cell<Option<Rank>>,
}

impl LocalCommunicator {
    /// Whether a failure has made this communicator unusable, and on which rank it started
    pub fn aborted(&self) -> Option<Rank> {
        self.aborted.get()
    }

    fn send(
        &self,
        peer: Rank,
        collective: Collective,
        datatype: SystemDatatype,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let sender = self.senders[peer as usize].as_ref().ok_or(Error::Rank {
            rank: peer,
            size: self.size,
        })?;
        sender
            .send(Message::Data {
                collective,
                datatype,
                bytes,
            })
            .map_err(|_| Error::Disconnected(peer))
    }

    fn receive(
        &self,
        peer: Rank,
        collective: Collective,
        datatype: SystemDatatype,
        len: usize,
    ) -> Result<Vec<u8>> {
        let receiver = self.receivers[peer as usize].as_ref().ok_or(Error::Rank {
            rank: peer,
            size: self.size,
        })?;
        match receiver.recv() {
            Ok(Message::Data {
                collective: remote,
                datatype: received,
                bytes,
            }) => {
                if remote != collective {
                    return Err(Error::NotSame {
                        peer,
                        local: collective,
                        remote,
                    });
                }
                if received != datatype {
                    return Err(Error::Type {
                        peer,
                        expected: datatype,
                        received,
                    });
                }
                let received = bytes.len() / datatype.size();
                if received != len {
                    return Err(Error::Truncate {
                        peer,
                        expected: len,
                        received,
                    });
                }
                Ok(bytes)
            }
            Ok(Message::Abort { origin }) => Err(Error::Aborted(origin)),
            Err(_) => Err(Error::Disconnected(peer)),
        }
    }

    fn peers(&self) -> impl Iterator<Item = Rank> + '_ {
        (0..self.size).filter(move |&peer| peer != self.rank)
    }

    fn check_root(&self, root: Rank) -> Result<()> {
        if 0 <= root && root < self.size {
            Ok(())
        } else {
            Err(Error::Root {
                root,
                size: self.size,
            })
        }
    }

    /// Runs one collective on this rank, poisoning the communicator if it fails.
    fn collective<T, F>(&self, collective: Collective, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(origin) = self.aborted.get() {
            return Err(Error::Aborted(origin));
        }
        trace!("rank {}: {} on the local runtime", self.rank, collective);
        f().map_err(|error| self.fail(error))
    }

    fn fail(&self, error: Error) -> Error {
        if self.aborted.get().is_none() {
            let origin = match error {
                Error::Aborted(origin) => origin,
                _ => self.rank,
            };
            debug!("rank {}: aborting communicator: {}", self.rank, error);
            self.aborted.set(Some(origin));
            for sender in self.senders.iter().flatten() {
                // peers that already left cannot be notified
                let _ = sender.send(Message::Abort { origin });
            }
        }
        error
    }

    /// Checks that `own` is a valid contribution to a receive buffer of `len` elements of
    /// `datatype`.
    fn check_own(&self, own: &DynBuffer<'_>, datatype: SystemDatatype, len: usize) -> Result<()> {
        if own.datatype() != datatype {
            return Err(Error::Type {
                peer: self.rank,
                expected: datatype,
                received: own.datatype(),
            });
        }
        if own.len() != len {
            return Err(Error::Truncate {
                peer: self.rank,
                expected: len,
                received: own.len(),
            });
        }
        Ok(())
    }

    /// Collects the contributions of all ranks at this rank and combines them in rank order.
    fn fold(
        &self,
        collective: Collective,
        own: Vec<u8>,
        datatype: SystemDatatype,
        op: SystemOperation,
    ) -> Result<Vec<u8>> {
        let len = own.len() / datatype.size();
        let mut own = Some(own);
        let mut acc: Option<Vec<u8>> = None;
        for peer in 0..self.size {
            let mut value = if peer == self.rank {
                own.take().unwrap_or_default()
            } else {
                self.receive(peer, collective, datatype, len)?
            };
            if let Some(prev) = acc {
                reduce_bytes(op, datatype, &prev, &mut value)?;
            }
            acc = Some(value);
        }
        Ok(acc.unwrap_or_default())
    }
}

/// Operations are checked on every rank before any data moves.
fn check_operation(op: SystemOperation, datatype: SystemDatatype) -> Result<()> {
    reduce_bytes(op, datatype, &[], &mut [])
}

fn missing(what: &str) -> Error {
    Error::Buffer(what.to_string())
}

/// Copies bytes received for `buffer` into it.
fn write(buffer: &mut DynBufferMut<'_>, offset: usize, bytes: &[u8]) -> Result<()> {
    // SAFETY: the bytes were checked to be elements of the buffer's datatype, either by the
    // message envelope or by the local checks, or were produced by the reduction kernel on such
    // elements.
    unsafe { buffer.write_at(offset, bytes) }
}

unsafe impl RawCommunicator for LocalCommunicator {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> Rank {
        self.size
    }

    fn raw_barrier(&self) -> Result<()> {
        self.collective(Collective::Barrier, || {
            for peer in self.peers() {
                self.send(peer, Collective::Barrier, SystemDatatype::U8, Vec::new())?;
            }
            for peer in self.peers() {
                self.receive(peer, Collective::Barrier, SystemDatatype::U8, 0)?;
            }
            Ok(())
        })
    }

    fn raw_broadcast(&self, mut buffer: DynBufferMut<'_>, root: Rank) -> Result<()> {
        self.collective(Collective::Broadcast, || {
            self.check_root(root)?;
            let datatype = buffer.datatype();
            if self.rank == root {
                let bytes = buffer.initialized_bytes()?;
                for peer in self.peers() {
                    self.send(peer, Collective::Broadcast, datatype, bytes.to_vec())?;
                }
                Ok(())
            } else {
                let bytes = self.receive(root, Collective::Broadcast, datatype, buffer.len())?;
                write(&mut buffer, 0, &bytes)
            }
        })
    }

    fn raw_gather(
        &self,
        send: SendBuffer<'_>,
        recv: Option<DynBufferMut<'_>>,
        root: Rank,
    ) -> Result<()> {
        self.collective(Collective::Gather, || {
            self.check_root(root)?;
            if self.rank != root {
                return match send {
                    SendBuffer::Buffer(send) => self.send(
                        root,
                        Collective::Gather,
                        send.datatype(),
                        send.as_bytes().to_vec(),
                    ),
                    SendBuffer::InPlace => {
                        Err(missing("in place gather on a rank that is not the root"))
                    }
                };
            }

            let mut recv =
                recv.ok_or_else(|| missing("gather without a receive buffer on the root"))?;
            let datatype = recv.datatype();
            let size = self.size as usize;
            if recv.len() % size != 0 {
                return Err(Error::count(format!(
                    "receive buffer of {} elements cannot hold {} equal blocks",
                    recv.len(),
                    size
                )));
            }
            let block = recv.len() / size;
            match send {
                SendBuffer::Buffer(own) => {
                    self.check_own(&own, datatype, block)?;
                    write(&mut recv, self.rank as usize * block, own.as_bytes())?;
                }
                SendBuffer::InPlace => {
                    recv.initialized_bytes()?;
                }
            }
            for peer in self.peers() {
                let bytes = self.receive(peer, Collective::Gather, datatype, block)?;
                write(&mut recv, peer as usize * block, &bytes)?;
            }
            Ok(())
        })
    }

    fn raw_gather_varcount(
        &self,
        send: DynBuffer<'_>,
        recv: Option<(DynBufferMut<'_>, &Partition)>,
        root: Rank,
    ) -> Result<()> {
        self.collective(Collective::GatherVarcount, || {
            self.check_root(root)?;
            if self.rank != root {
                return self.send(
                    root,
                    Collective::GatherVarcount,
                    send.datatype(),
                    send.as_bytes().to_vec(),
                );
            }

            let (mut recv, partition) =
                recv.ok_or_else(|| missing("gather without a receive buffer on the root"))?;
            if partition.len() != self.size as usize || partition.total() != recv.len() {
                return Err(Error::count(format!(
                    "layout of {} elements over {} ranks does not describe a receive buffer of {} \
                     elements over {} ranks",
                    partition.total(),
                    partition.len(),
                    recv.len(),
                    self.size
                )));
            }
            let datatype = recv.datatype();
            let own = partition.range(self.rank as usize);
            self.check_own(&send, datatype, own.len())?;
            write(&mut recv, own.start, send.as_bytes())?;
            for peer in self.peers() {
                let range = partition.range(peer as usize);
                let bytes = self.receive(peer, Collective::GatherVarcount, datatype, range.len())?;
                write(&mut recv, range.start, &bytes)?;
            }
            Ok(())
        })
    }

    fn raw_scatter(
        &self,
        send: Option<DynBuffer<'_>>,
        mut recv: DynBufferMut<'_>,
        root: Rank,
    ) -> Result<()> {
        self.collective(Collective::Scatter, || {
            self.check_root(root)?;
            let datatype = recv.datatype();
            let block = recv.len();
            if self.rank != root {
                let bytes = self.receive(root, Collective::Scatter, datatype, block)?;
                return write(&mut recv, 0, &bytes);
            }

            let send = send.ok_or_else(|| missing("scatter without a send buffer on the root"))?;
            self.check_own(&send, datatype, block * self.size as usize)?;
            for peer in self.peers() {
                let start = peer as usize * block;
                let bytes = send.elements(start..start + block).to_vec();
                self.send(peer, Collective::Scatter, datatype, bytes)?;
            }
            let start = self.rank as usize * block;
            write(&mut recv, 0, send.elements(start..start + block))
        })
    }

    fn raw_reduce(
        &self,
        send: SendBuffer<'_>,
        recv: Option<DynBufferMut<'_>>,
        op: SystemOperation,
        root: Rank,
    ) -> Result<()> {
        self.collective(Collective::Reduce, || {
            self.check_root(root)?;
            if self.rank != root {
                return match send {
                    SendBuffer::Buffer(send) => {
                        check_operation(op, send.datatype())?;
                        self.send(
                            root,
                            Collective::Reduce,
                            send.datatype(),
                            send.as_bytes().to_vec(),
                        )
                    }
                    SendBuffer::InPlace => {
                        Err(missing("in place reduce on a rank that is not the root"))
                    }
                };
            }

            let mut recv =
                recv.ok_or_else(|| missing("reduce without a receive buffer on the root"))?;
            let datatype = recv.datatype();
            check_operation(op, datatype)?;
            let own = match send {
                SendBuffer::Buffer(own) => {
                    self.check_own(&own, datatype, recv.len())?;
                    own.as_bytes().to_vec()
                }
                SendBuffer::InPlace => recv.initialized_bytes()?.to_vec(),
            };
            let result = self.fold(Collective::Reduce, own, datatype, op)?;
            write(&mut recv, 0, &result)
        })
    }

    fn raw_all_reduce(
        &self,
        send: DynBuffer<'_>,
        mut recv: DynBufferMut<'_>,
        op: SystemOperation,
    ) -> Result<()> {
        self.collective(Collective::AllReduce, || {
            let datatype = recv.datatype();
            check_operation(op, datatype)?;
            self.check_own(&send, datatype, recv.len())?;
            let result = if self.rank == 0 {
                let own = send.as_bytes().to_vec();
                let result = self.fold(Collective::AllReduce, own, datatype, op)?;
                for peer in self.peers() {
                    self.send(peer, Collective::AllReduce, datatype, result.clone())?;
                }
                result
            } else {
                self.send(0, Collective::AllReduce, datatype, send.as_bytes().to_vec())?;
                self.receive(0, Collective::AllReduce, datatype, recv.len())?
            };
            write(&mut recv, 0, &result)
        })
    }

    fn raw_scan(
        &self,
        send: DynBuffer<'_>,
        mut recv: DynBufferMut<'_>,
        op: SystemOperation,
    ) -> Result<()> {
        self.collective(Collective::Scan, || {
            let datatype = recv.datatype();
            check_operation(op, datatype)?;
            self.check_own(&send, datatype, recv.len())?;
            let mut value = send.as_bytes().to_vec();
            if self.rank > 0 {
                let prefix = self.receive(self.rank - 1, Collective::Scan, datatype, recv.len())?;
                reduce_bytes(op, datatype, &prefix, &mut value)?;
            }
            if self.rank + 1 < self.size {
                self.send(self.rank + 1, Collective::Scan, datatype, value.clone())?;
            }
            write(&mut recv, 0, &value)
        })
    }

    fn raw_all_to_all(&self, send: DynBuffer<'_>, mut recv: DynBufferMut<'_>) -> Result<()> {
        self.collective(Collective::AllToAll, || {
            let datatype = recv.datatype();
            let size = self.size as usize;
            self.check_own(&send, datatype, recv.len())?;
            if recv.len() % size != 0 {
                return Err(Error::count(format!(
                    "{} elements cannot be split into {} equal blocks",
                    recv.len(),
                    size
                )));
            }
            let block = recv.len() / size;
            for peer in self.peers() {
                let start = peer as usize * block;
                let bytes = send.elements(start..start + block).to_vec();
                self.send(peer, Collective::AllToAll, datatype, bytes)?;
            }
            for peer in 0..self.size {
                let start = peer as usize * block;
                if peer == self.rank {
                    write(&mut recv, start, send.elements(start..start + block))?;
                } else {
                    let bytes = self.receive(peer, Collective::AllToAll, datatype, block)?;
                    write(&mut recv, start, &bytes)?;
                }
            }
            Ok(())
        })
    }

    fn raw_abort(&self, error: Error) -> Error {
        self.fail(error)
    }
}

impl AsCommunicator for LocalCommunicator {
    type Out = LocalCommunicator;
    fn as_communicator(&self) -> &Self::Out {
        self
    }
}

impl fmt::Debug for LocalCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LocalCommunicator")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("aborted", &self.aborted.get())
            .finish()
    }
}

/// A set of ranks running as threads of the calling process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalUniverse {
    size: Rank,
}

impl LocalUniverse {
    /// A universe of `size` ranks.
    ///
    /// # Panics
    ///
    /// If `size` is zero or exceeds the range of `Rank`.
    pub fn new(size: usize) -> LocalUniverse {
        assert!(size > 0, "a universe needs at least one rank");
        let size = size
            .value_as::<Rank>()
            .unwrap_or_else(|_| panic!("{} ranks exceed the range of a rank", size));
        LocalUniverse { size }
    }

    /// A universe with as many ranks as the `COLLECTIVES_NUM_RANKS` environment variable says,
    /// or one rank per available hardware thread if it is unset.
    ///
    /// The variable is read once per process.
    pub fn from_env() -> LocalUniverse {
        LocalUniverse::new(*NUM_RANKS)
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// One connected communicator per rank, in rank order.
    pub fn communicators(&self) -> Vec<LocalCommunicator> {
        let n = self.size as usize;
        let mut grid: Vec<Vec<_>> = (0..n)
            .map(|_| {
                (0..n)
                    .map(|_| {
                        let (sender, receiver) = channel();
                        (Some(sender), Some(receiver))
                    })
                    .collect()
            })
            .collect();
        (0..n)
            .map(|rank| {
                let mut senders = Vec::with_capacity(n);
                let mut receivers = Vec::with_capacity(n);
                for peer in 0..n {
                    if peer == rank {
                        senders.push(None);
                        receivers.push(None);
                    } else {
                        senders.push(grid[rank][peer].0.take());
                        receivers.push(grid[peer][rank].1.take());
                    }
                }
                LocalCommunicator {
                    rank: rank as Rank,
                    size: self.size,
                    senders,
                    receivers,
                    aborted: Cell::new(None),
                }
            })
            .collect()
    }

    /// Runs `f` on one thread per rank and returns the results in rank order.
    ///
    /// Returns once every rank has finished. If ranks panic, the panic that happened first is
    /// resumed on the calling thread after all threads have been joined.
    pub fn run<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(LocalCommunicator) -> R + Sync,
        R: Send,
    {
        debug!("spawning {} local ranks", self.size);
        let f = &f;
        let panics = AtomicUsize::new(0);
        let panics = &panics;
        let outcomes: Vec<thread::Result<std::result::Result<R, (usize, Box<dyn Any + Send>)>>> =
            thread::scope(|scope| {
                let handles: Vec<_> = self
                    .communicators()
                    .into_iter()
                    .map(|comm| {
                        scope.spawn(move || {
                            panic::catch_unwind(AssertUnwindSafe(|| f(comm)))
                                .map_err(|payload| (panics.fetch_add(1, Ordering::SeqCst), payload))
                        })
                    })
                    .collect();
                handles.into_iter().map(|handle| handle.join()).collect()
            });

        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_panic: Option<(usize, Box<dyn Any + Send>)> = None;
        for (rank, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(Ok(result)) => results.push(result),
                Ok(Err((order, payload))) => {
                    debug!("rank {} panicked", rank);
                    if first_panic.as_ref().map_or(true, |(first, _)| order < *first) {
                        first_panic = Some((order, payload));
                    }
                }
                Err(payload) => {
                    if first_panic.is_none() {
                        first_panic = Some((usize::MAX, payload));
                    }
                }
            }
        }
        if let Some((_, payload)) = first_panic {
            panic::resume_unwind(payload);
        }
        debug!("joined {} local ranks", self.size);
        results
    }
}

/// Runs `f` on a `LocalUniverse` of `size` ranks, see `LocalUniverse::run()`.
pub fn run<F, R>(size: usize, f: F) -> Vec<R>
where
    F: Fn(LocalCommunicator) -> R + Sync,
    R: Send,
{
    LocalUniverse::new(size).run(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::Sum;
    use crate::traits::*;

    #[test]
    fn communicators_are_connected_pairwise() {
        let comms = LocalUniverse::new(3).communicators();
        assert_eq!(comms.len(), 3);
        for (rank, comm) in comms.iter().enumerate() {
            assert_eq!(comm.rank() as usize, rank);
            assert_eq!(comm.size(), 3);
            assert!(comm.senders[rank].is_none());
            assert_eq!(comm.senders.iter().flatten().count(), 2);
            assert_eq!(comm.receivers.iter().flatten().count(), 2);
        }
    }

    #[test]
    fn single_rank_universe() {
        let results = run(1, |world| {
            let total = world.all_reduce(&5u32, Sum).unwrap();
            let prefix = world.scan(&5u32, Sum).unwrap();
            world.barrier().unwrap();
            (total, prefix)
        });
        assert_eq!(results, vec![(5, 5)]);
    }

    #[test]
    fn mismatched_collectives_are_detected() {
        let results = run(2, |world| {
            if world.rank() == 0 {
                world.barrier()
            } else {
                world.all_reduce(&1i32, Sum).map(|_| ())
            }
        });
        assert!(results.iter().all(|r| r.is_err()));
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::NotSame { .. }))));
    }

    #[test]
    fn failures_poison_the_communicator() {
        let results = run(3, |world| {
            let first = world.process_at_rank(7).broadcast_into(&mut 0u8);
            let second = world.barrier();
            (first, second, world.aborted().is_some())
        });
        for (first, second, aborted) in results {
            assert_eq!(first, Err(Error::Root { root: 7, size: 3 }));
            assert!(matches!(second, Err(Error::Aborted(_))));
            assert!(aborted);
        }
    }

    #[test]
    fn panics_are_resumed_on_the_caller() {
        let outcome = panic::catch_unwind(|| {
            run(2, |world| {
                if world.rank() == 1 {
                    panic!("rank 1 gives up");
                }
                world.barrier()
            })
        });
        let payload = outcome.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"rank 1 gives up"));
    }

    #[test]
    fn universe_size_from_env_is_positive() {
        assert!(LocalUniverse::from_env().size() > 0);
    }
}
