use collectives::traits::*;

fn main() {
    let results = collectives::local::LocalUniverse::from_env().run(|world| {
        let rank = world.rank();
        let size = world.size();

        // two values for every destination rank
        let u: Vec<_> = (0..size * 2).map(|i| rank * 100 + i).collect();
        let v = world.all_to_all(&u, 2)?;
        println!("Rank {} sent {:?}, received {:?}.", rank, u, v);

        for (j, block) in v.chunks(2).enumerate() {
            let j = j as i32;
            assert_eq!(block, [j * 100 + rank * 2, j * 100 + rank * 2 + 1]);
        }
        Ok::<_, collectives::Error>(())
    });
    for result in results {
        result.unwrap();
    }
}
