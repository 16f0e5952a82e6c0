use typed_collectives::collective::Sum;
use typed_collectives::traits::*;

/// The crate is renamed in Cargo.toml, so the generated impl only resolves through the
/// `#[collectives(crate)]` attribute.
#[derive(Equivalence, Clone, Copy, Debug, PartialEq)]
#[collectives(crate = "::typed_collectives")]
struct Particle {
    position: [f64; 3],
    mass: f64,
}

#[test]
fn derive_custom_path() {
    assert_eq!(<Particle as Equivalence>::COUNT, 4);

    let totals = typed_collectives::local::run(2, |world| {
        let p = Particle {
            position: [1.0, 2.0, 3.0],
            mass: world.rank() as f64,
        };
        world.all_reduce(&p, Sum)
    });
    for total in totals {
        assert_eq!(
            total,
            Ok(Particle {
                position: [2.0, 4.0, 6.0],
                mass: 1.0,
            })
        );
    }
}
