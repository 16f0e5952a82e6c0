#![cfg(feature = "derive")]

use collectives::collective::{Max, Sum};
use collectives::traits::*;

const CONSTANT: usize = 7;

/// Array lengths given by a constant count as that many elements.
#[test]
fn derive_equivalence() {
    #[derive(Equivalence, Clone, Copy)]
    struct ArrayWrapper {
        field: [f32; CONSTANT],
    }

    assert_eq!(<ArrayWrapper as Equivalence>::COUNT, CONSTANT);
    assert_eq!(
        <ArrayWrapper as Equivalence>::equivalent_datatype(),
        collectives::datatype::SystemDatatype::F32
    );
}

#[derive(Equivalence, Clone, Copy, Debug, PartialEq)]
struct Counters(u32, [u32; 2], u32);

#[derive(Equivalence, Clone, Copy, Debug, PartialEq, Default)]
#[repr(C)]
struct Extent {
    lower: [i64; 2],
    upper: [i64; 2],
}

#[test]
fn tuple_structs_flatten_their_fields() {
    assert_eq!(<Counters as Equivalence>::COUNT, 4);
    let c = Counters(1, [2, 3], 4);
    assert_eq!(c.count(), 4);
    assert_eq!(c.as_dyn().len(), 4);
}

#[test]
fn derived_structs_reduce_element_wise() {
    let results = collectives::local::run(3, |world| {
        let r = world.rank() as u32;
        world.all_reduce(&Counters(r, [1, r * 2], 10), Sum)
    });
    for result in results {
        assert_eq!(result, Ok(Counters(3, [3, 6], 30)));
    }

    let results = collectives::local::run(3, |world| {
        let r = world.rank() as i64;
        let extent = Extent {
            lower: [-r, r],
            upper: [r * 10, 5 - r],
        };
        world.all_reduce(&extent, Max)
    });
    for result in results {
        assert_eq!(
            result,
            Ok(Extent {
                lower: [0, 2],
                upper: [20, 5],
            })
        );
    }
}

#[test]
fn derived_structs_gather_with_varying_counts() {
    let results = collectives::local::run(3, |world| {
        let root = world.process_at_rank(1);
        let mine = vec![Extent::default(); world.rank() as usize];
        if world.rank() == root.rank() {
            root.gather_varcount_into_root(&mine[..]).map(Some)
        } else {
            root.gather_varcount_into(&mine[..]).map(|_| None)
        }
    });
    let gathered = results[1].clone().unwrap().unwrap();
    assert_eq!(gathered.iter().map(Vec::len).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert!(results[0].as_ref().unwrap().is_none());
}
