#![cfg(feature = "complex")]

use collectives::collective::{reduce_local_into, Product, Sum};
use collectives::datatype::SystemDatatype;
use collectives::traits::*;
use num_complex::{Complex32, Complex64};

#[test]
fn complex_numbers_are_single_elements() {
    assert_eq!(Complex64::equivalent_datatype(), SystemDatatype::ComplexF64);
    assert_eq!(<[Complex32; 4] as Equivalence>::COUNT, 4);
    assert_eq!(SystemDatatype::ComplexF32.size(), 8);
}

#[test]
fn broadcast_of_complex_numbers() {
    let results = collectives::local::run(3, |world| {
        let mut data = if world.rank() == 0 {
            vec![
                Complex64::new(1.0, 2.0),
                Complex64::new(2.0, 3.0),
                Complex64::new(3.0, 4.0),
            ]
        } else {
            vec![Complex64::new(0.0, 0.0); 3]
        };
        world.process_at_rank(0).broadcast_into(&mut data).map(|_| data)
    });
    for data in results {
        assert_eq!(
            data.unwrap(),
            vec![
                Complex64::new(1.0, 2.0),
                Complex64::new(2.0, 3.0),
                Complex64::new(3.0, 4.0),
            ]
        );
    }
}

#[test]
fn complex_sum_and_product() {
    let results = collectives::local::run(2, |world| {
        let z = Complex64::new(world.rank() as f64, 1.0);
        Ok::<_, collectives::Error>((world.all_reduce(&z, Sum)?, world.all_reduce(&z, Product)?))
    });
    for result in results {
        let (sum, product) = result.unwrap();
        assert_eq!(sum, Complex64::new(1.0, 2.0));
        // i * (1 + i) = -1 + i
        assert_eq!(product, Complex64::new(-1.0, 1.0));
    }

    let mut acc = [Complex32::new(1.0, 1.0)];
    reduce_local_into(&[Complex32::new(0.0, 1.0)][..], &mut acc[..], Product).unwrap();
    assert_eq!(acc, [Complex32::new(-1.0, 1.0)]);
}
