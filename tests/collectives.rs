use collectives::collective::{BitwiseOr, LogicalAnd, Max, Min, Product, Sum, SystemOperation};
use collectives::local::{self, LocalUniverse};
use collectives::topology::Rank;
use collectives::traits::*;
use collectives::{Error, ErrorKind};

const SIZES: [usize; 4] = [1, 2, 3, 5];

/// Runs `f` on each rank and unwraps the per-rank results.
fn run_ok<F, R>(size: usize, f: F) -> Vec<R>
where
    F: Fn(local::LocalCommunicator) -> collectives::Result<R> + Sync,
    R: Send + std::fmt::Debug,
{
    local::run(size, f)
        .into_iter()
        .enumerate()
        .map(|(rank, result)| result.unwrap_or_else(|e| panic!("rank {} failed: {}", rank, e)))
        .collect()
}

#[test]
fn broadcast_copies_the_root_value_everywhere() {
    for &size in &SIZES {
        for root in 0..size as Rank {
            let results = run_ok(size, |world| {
                let mut x = if world.rank() == root {
                    [root as f64, 0.5, -7.25]
                } else {
                    [0.0; 3]
                };
                world.process_at_rank(root).broadcast_into(&mut x)?;
                Ok(x)
            });
            assert!(results.iter().all(|&x| x == [root as f64, 0.5, -7.25]));
        }
    }
}

#[test]
fn broadcast_of_a_vec() {
    let results = run_ok(4, |world| {
        let mut v = if world.rank() == 2 {
            vec![1u16, 1, 2, 3, 5, 8]
        } else {
            vec![0u16; 6]
        };
        world.process_at_rank(2).broadcast_into(&mut v)?;
        Ok(v)
    });
    for v in results {
        assert_eq!(v, vec![1, 1, 2, 3, 5, 8]);
    }
}

#[test]
fn fixed_gather_is_rank_ordered_on_the_root() {
    for &size in &SIZES {
        let root = (size / 2) as Rank;
        let results = run_ok(size, |world| {
            let p = world.process_at_rank(root);
            let mine = [world.rank(), world.rank() * 100];
            if world.rank() == root {
                p.gather_into_root(&mine).map(Some)
            } else {
                p.gather_into(&mine).map(|_| None)
            }
        });
        for (rank, result) in results.into_iter().enumerate() {
            if rank as Rank == root {
                let gathered = result.unwrap();
                assert_eq!(gathered.len(), size);
                for (i, item) in gathered.iter().enumerate() {
                    assert_eq!(*item, [i as Rank, i as Rank * 100]);
                }
            } else {
                assert!(result.is_none());
            }
        }
    }
}

#[test]
fn in_place_gather_fills_the_root_storage() {
    for &size in &SIZES {
        for root in 0..size as Rank {
            let results = run_ok(size, |world| {
                let p = world.process_at_rank(root);
                let me = world.this_process();
                let r = me.rank();
                if p.is_self() {
                    let mut all = vec![-1i32; 2 * size];
                    all[2 * r as usize] = r * 10;
                    all[2 * r as usize + 1] = r * 10 + 1;
                    p.gather_in_place_root(&mut all[..])?;
                    Ok(Some(all))
                } else {
                    assert!(me.is_self());
                    assert_ne!(r, root);
                    p.gather_into(&[r * 10, r * 10 + 1][..])?;
                    Ok(None)
                }
            });
            let expected: Vec<i32> = (0..size as i32).flat_map(|i| [i * 10, i * 10 + 1]).collect();
            for (rank, result) in results.into_iter().enumerate() {
                if rank as Rank == root {
                    assert_eq!(result, Some(expected.clone()));
                } else {
                    assert_eq!(result, None);
                }
            }
        }
    }
}

#[test]
fn variable_gather_returns_each_contribution_exactly() {
    for &size in &SIZES {
        let results = run_ok(size, |world| {
            let p = world.process_at_rank(0);
            let r = world.rank() as u64;
            let mine: Vec<u64> = (0..r * 2).map(|i| r * 1000 + i).collect();
            if world.rank() == 0 {
                p.gather_varcount_into_root(&mine[..]).map(Some)
            } else {
                p.gather_varcount_into(&mine[..]).map(|_| None)
            }
        });
        let gathered = results[0].clone().unwrap();
        assert_eq!(gathered.len(), size);
        for (r, sub) in gathered.iter().enumerate() {
            let r = r as u64;
            let expected: Vec<u64> = (0..r * 2).map(|i| r * 1000 + i).collect();
            assert_eq!(*sub, expected);
        }
        let total: usize = gathered.iter().map(Vec::len).sum();
        assert_eq!(total, (0..size).map(|r| r * 2).sum::<usize>());
    }
}

#[test]
fn variable_gather_of_arrays_with_empty_contributions() {
    let results = run_ok(3, |world| {
        let p = world.process_at_rank(2);
        let mine: Vec<[i8; 3]> = if world.rank() == 1 {
            Vec::new()
        } else {
            vec![[world.rank() as i8; 3]; 2]
        };
        if world.rank() == 2 {
            p.gather_varcount_into_root(&mine).map(Some)
        } else {
            p.gather_varcount_into(&mine).map(|_| None)
        }
    });
    assert_eq!(
        results[2].clone().unwrap(),
        vec![vec![[0i8; 3]; 2], vec![], vec![[2i8; 3]; 2]]
    );
}

#[test]
fn gather_then_scatter_reconstructs_the_inputs() {
    for &size in &SIZES {
        let results = run_ok(size, |world| {
            let p = world.process_at_rank(0);
            let mine = [world.rank() as f32 * 1.5, -(world.rank() as f32)];
            let mut back = [0.0f32; 2];
            if world.rank() == 0 {
                let all = p.gather_into_root(&mine)?;
                p.scatter_into_root(&all[..], &mut back)?;
            } else {
                p.gather_into(&mine)?;
                p.scatter_into(&mut back)?;
            }
            Ok((mine, back))
        });
        for (mine, back) in results {
            assert_eq!(mine, back);
        }
    }
}

#[test]
fn reduce_delivers_the_combination_to_the_root() {
    for &size in &SIZES {
        let root = (size - 1) as Rank;
        let results = run_ok(size, |world| {
            let p = world.process_at_rank(root);
            let x = [world.rank() as i64 + 1, 2];
            if world.rank() == root {
                let mut sum = [0i64; 2];
                p.reduce_into_root(&x, &mut sum, Sum)?;
                let product = p.reduce_root(&x, Product)?;
                Ok(Some((sum, product)))
            } else {
                p.reduce_into(&x, Sum)?;
                p.reduce_into(&x, Product)?;
                Ok(None)
            }
        });
        let n = size as i64;
        let factorial: i64 = (1..=n).product();
        assert_eq!(
            results[root as usize],
            Some(([n * (n + 1) / 2, 2 * n], [factorial, 1 << size]))
        );
    }
}

#[test]
fn in_place_reduce_uses_the_root_buffer() {
    let results = run_ok(4, |world| {
        let p = world.process_at_rank(1);
        let mine = [world.rank() as u8, 1 << world.rank()];
        if world.rank() == 1 {
            let mut acc = mine;
            p.reduce_in_place_root(&mut acc, BitwiseOr)?;
            Ok(Some(acc))
        } else {
            p.reduce_into(&mine, BitwiseOr)?;
            Ok(None)
        }
    });
    assert_eq!(results[1], Some([3, 15]));
}

#[test]
fn all_reduce_and_scan_of_four_ranks() {
    let results = run_ok(4, |world| {
        let x = [10, 20, 30, 40][world.rank() as usize];
        Ok((world.all_reduce(&x, Sum)?, world.scan(&x, Sum)?))
    });
    assert_eq!(results, vec![(100, 10), (100, 30), (100, 60), (100, 100)]);
}

#[test]
fn all_reduce_folds_all_inputs_everywhere() {
    for &size in &SIZES {
        let results = run_ok(size, |world| {
            let r = world.rank();
            let mut out = [0.0f64; 2];
            world.all_reduce_into(&[r as f64, -(r as f64)][..], &mut out[..], Max)?;
            let min = world.all_reduce(&(r as u32 + 3), Min)?;
            let all = world.all_reduce(&(r % 2 == 0), LogicalAnd)?;
            Ok((out, min, all))
        });
        for (out, min, all) in results {
            assert_eq!(out, [(size - 1) as f64, 0.0]);
            assert_eq!(min, 3);
            assert_eq!(all, size == 1);
        }
    }
}

#[test]
fn scan_is_the_inclusive_prefix() {
    for &size in &SIZES {
        let results = run_ok(size, |world| {
            let x = [world.rank() as i32 + 1, 1];
            let mut prefix = [0i32; 2];
            world.scan_into(&x, &mut prefix, Sum)?;
            let total = world.all_reduce(&x, Sum)?;
            Ok((prefix, total))
        });
        for (rank, (prefix, _)) in results.iter().enumerate() {
            let i = rank as i32 + 1;
            assert_eq!(*prefix, [i * (i + 1) / 2, i]);
        }
        let (last_prefix, total) = results[size - 1];
        assert_eq!(last_prefix, total);
    }
}

#[test]
fn all_to_all_exchanges_blocks() {
    for &size in &SIZES {
        for n in 0..3usize {
            let results = run_ok(size, |world| {
                let i = world.rank() as usize;
                let send: Vec<u32> = (0..size * n).map(|k| (i * 1000 + k) as u32).collect();
                let recv = world.all_to_all(&send, n)?;
                Ok((send, recv))
            });
            for i in 0..size {
                let (_, ref recv) = results[i];
                assert_eq!(recv.len(), size * n);
                for j in 0..size {
                    let (ref send_j, _) = results[j];
                    assert_eq!(recv[j * n..(j + 1) * n], send_j[i * n..(i + 1) * n]);
                }
            }
        }
    }
}

#[test]
fn all_to_all_into_buffers() {
    let results = run_ok(3, |world| {
        let r = world.rank() as i16;
        let send = [[r, 0], [r, 1], [r, 2]];
        let mut recv = [[0i16; 2]; 3];
        world.all_to_all_into(&send[..], &mut recv[..])?;
        Ok(recv)
    });
    for (i, recv) in results.iter().enumerate() {
        let i = i as i16;
        assert_eq!(*recv, [[0, i], [1, i], [2, i]]);
    }
}

#[test]
fn barrier_completes_on_every_size() {
    for &size in &SIZES {
        let results = run_ok(size, |world| {
            world.barrier()?;
            world.barrier()
        });
        assert_eq!(results.len(), size);
    }
}

#[test]
fn universe_runs_are_independent() {
    let universe = LocalUniverse::new(3);
    for round in 0..3 {
        let totals = universe.run(|world| world.all_reduce(&(world.rank() + round), Sum));
        assert!(totals.into_iter().all(|t| t == Ok(3 + 3 * round)));
    }
}

#[test]
fn invalid_root_is_reported_everywhere() {
    let results = local::run(3, |world| world.process_at_rank(3).broadcast_into(&mut 0i32));
    for result in results {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Root);
    }
}

#[test]
fn mismatched_fixed_gather_is_truncated() {
    let results = local::run(3, |world| {
        let p = world.process_at_rank(0);
        if world.rank() == 0 {
            p.gather_into_root(&[1u8, 2][..]).map(|_| ())
        } else {
            let mine = vec![0u8; world.rank() as usize + 1];
            p.gather_into(&mine[..])
        }
    });
    assert_eq!(
        results[0],
        Err(Error::Truncate {
            peer: 2,
            expected: 2,
            received: 3
        })
    );
}

#[test]
fn mismatched_datatypes_are_detected() {
    let results = local::run(2, |world| {
        if world.rank() == 0 {
            world.all_reduce(&1i32, Sum).map(|_| ())
        } else {
            world.all_reduce(&1f32, Sum).map(|_| ())
        }
    });
    assert!(matches!(results[0], Err(Error::Type { peer: 1, .. })));
    assert!(results[1].is_err());
}

#[test]
fn undefined_operations_fail_on_every_rank() {
    let results = local::run(3, |world| world.all_reduce(&1.5f64, SystemOperation::BitwiseXor));
    for result in results {
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Op);
    }
}

#[test]
fn block_size_mismatch_aborts_the_peers() {
    let results = local::run(3, |world| {
        let n = if world.rank() == 1 { 2 } else { 1 };
        world.all_to_all(&[0u64; 3], n)
    });
    assert_eq!(results[1].as_ref().unwrap_err().kind(), ErrorKind::Count);
    assert!(results.iter().all(|r| r.is_err()));
}

#[test]
#[should_panic]
fn root_variant_on_a_non_root_panics() {
    local::run(2, |world| {
        let p = world.process_at_rank(0);
        p.reduce_root(&1i32, Sum)
    });
}
