use collectives::collective::Sum;
use collectives::traits::*;

fn main() {
    let universe = collectives::initialize().unwrap();
    let world = universe.world();
    let rank = world.rank();
    let size = world.size();

    let total = world.all_reduce(&rank, Sum).unwrap();
    assert_eq!(total, size * (size - 1) / 2);

    let root_process = world.process_at_rank(0);
    let msg = vec![rank as f64; rank as usize];
    if rank == 0 {
        let gathered = root_process.gather_varcount_into_root(&msg[..]).unwrap();
        println!("Gathered {:?} from {} processes.", gathered, size);
    } else {
        root_process.gather_varcount_into(&msg[..]).unwrap();
    }
}
