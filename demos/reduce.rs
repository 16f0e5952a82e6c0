use collectives::collective::{self, BitwiseAnd, BitwiseOr, BitwiseXor, Max, Sum};
use collectives::topology::Rank;
use collectives::traits::*;

fn main() {
    let results = collectives::local::LocalUniverse::from_env().run(|world| {
        let rank = world.rank();
        let size = world.size();
        let root_rank = 0;
        let root_process = world.process_at_rank(root_rank);

        if rank == root_rank {
            let mut sum: Rank = 0;
            root_process.reduce_into_root(&rank, &mut sum, Sum)?;
            assert_eq!(sum, size * (size - 1) / 2);
        } else {
            root_process.reduce_into(&rank, Sum)?;
        }

        let max = world.all_reduce(&rank, Max)?;
        assert_eq!(max, size - 1);

        let mut prefix: Rank = 0;
        world.scan_into(&rank, &mut prefix, Sum)?;
        assert_eq!(prefix, rank * (rank + 1) / 2);
        Ok::<_, collectives::Error>(())
    });
    for result in results {
        result.unwrap();
    }

    let a: u64 = 0b0000111111110000;
    let b: u64 = 0b0011110000111100;

    let mut c = b;
    collective::reduce_local_into(&a, &mut c, BitwiseAnd).unwrap();
    assert_eq!(c, 0b0000110000110000);

    let mut d = b;
    collective::reduce_local_into(&a, &mut d, BitwiseOr).unwrap();
    assert_eq!(d, 0b0011111111111100);

    let mut e = b;
    collective::reduce_local_into(&a, &mut e, BitwiseXor).unwrap();
    assert_eq!(e, 0b0011001111001100);
}
