//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use regionflow::image::Image;

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Assert two real images share a region and agree pixel by pixel
pub fn assert_images_close(actual: &Image, expected: &Image, epsilon: f64) {
    assert_eq!(actual.region, expected.region, "regions differ");
    let (a, b) = (actual.pixels().unwrap(), expected.pixels().unwrap());
    for (offset, (x, y)) in a.iter().zip(b).enumerate() {
        assert!(
            (x - y).abs() < epsilon,
            "pixel {:?}: {} vs {}",
            actual.region.index_at(offset),
            x,
            y
        );
    }
}
