#![deny(warnings)]

/// io for the feature-barcode matrix h5 written by Cell Ranger
pub mod matrix;

pub use matrix::read_10x_h5;
