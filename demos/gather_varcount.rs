use collectives::traits::*;

fn main() {
    let results = collectives::local::run(4, |world| {
        let rank = world.rank();
        let root_process = world.process_at_rank(0);

        // rank i contributes i copies of itself
        let msg: Vec<i32> = vec![rank; rank as usize];

        if rank == 0 {
            let gathered = root_process.gather_varcount_into_root(&msg[..])?;
            for (i, part) in gathered.iter().enumerate() {
                println!("Rank {} sent {:?}.", i, part);
                assert_eq!(part.len(), i);
                assert!(part.iter().all(|&x| x as usize == i));
            }
        } else {
            root_process.gather_varcount_into(&msg[..])?;
        }
        Ok::<_, collectives::Error>(())
    });
    for result in results {
        result.unwrap();
    }
}
