use collectives::traits::*;

fn main() {
    let results = collectives::local::LocalUniverse::from_env().run(|world| {
        let root_rank = 0;
        let root_process = world.process_at_rank(root_rank);

        let mut x = if world.rank() == root_rank {
            2_u64.pow(10)
        } else {
            0_u64
        };
        root_process.broadcast_into(&mut x)?;
        println!("Rank {} received value: {}.", world.rank(), x);
        assert_eq!(x, 1024);

        let mut a = if world.rank() == root_rank {
            [2_u64, 4, 8, 16]
        } else {
            [0_u64; 4]
        };
        root_process.broadcast_into(&mut a[..])?;
        println!("Rank {} received value: {:?}.", world.rank(), a);
        assert_eq!(a, [2, 4, 8, 16]);

        let mine = [world.rank(), world.rank() * world.rank()];
        if world.rank() == root_rank {
            let gathered = root_process.gather_into_root(&mine)?;
            println!("Root gathered {:?}.", gathered);
        } else {
            root_process.gather_into(&mine)?;
        }
        Ok::<_, collectives::Error>(())
    });
    for result in results {
        result.unwrap();
    }
}
