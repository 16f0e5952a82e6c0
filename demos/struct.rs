use collectives::collective::Sum;
use collectives::traits::*;

#[derive(Equivalence, Clone, Copy, Debug, PartialEq, Default)]
struct Particle {
    position: [f64; 3],
    velocity: [f64; 3],
    mass: f64,
}

#[derive(Equivalence, Clone, Copy, Debug, PartialEq)]
struct Histogram([u32; 8]);

fn main() {
    let results = collectives::local::run(4, |world| {
        let rank = world.rank();
        let root_process = world.process_at_rank(0);

        let p = Particle {
            position: [rank as f64, 0.0, 1.0],
            velocity: [0.0, -(rank as f64), 0.0],
            mass: 1.0,
        };
        let total = world.all_reduce(&p, Sum)?;
        assert_eq!(total.mass, 4.0);
        assert_eq!(total.position, [6.0, 0.0, 4.0]);

        let mut bins = [0u32; 8];
        bins[rank as usize] = 1;
        if rank == 0 {
            let histogram = root_process.reduce_root(&Histogram(bins), Sum)?;
            println!("Histogram: {:?}", histogram);
            assert_eq!(histogram.0, [1, 1, 1, 1, 0, 0, 0, 0]);

            let particles = root_process.gather_into_root(&p)?;
            assert_eq!(particles.len(), 4);
        } else {
            root_process.reduce_into(&Histogram(bins), Sum)?;
            root_process.gather_into(&p)?;
        }
        Ok::<_, collectives::Error>(())
    });
    for result in results {
        result.unwrap();
    }
}
