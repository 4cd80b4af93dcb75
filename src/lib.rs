// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

#[macro_use]
extern crate serde;

pub mod crosswalk;
pub mod error;
pub mod geometry;
pub mod intersection_events;
pub mod io;
pub mod locator;
pub mod matcher;
pub mod model;
pub mod route_builder;
pub mod spatial;
pub mod transfer;

/// Measures written to output tables are rounded to this many decimal places.
pub const MEASURE_DECIMAL_PLACES: u32 = 3;

/// Round a value to a fixed number of decimal places.
pub fn round_to(value: f64, decimal_places: u32) -> f64 {
    let factor = 10f64.powi(decimal_places as i32);
    (value * factor).round() / factor
}

/// Round a measure to the table precision used across the pipeline.
pub fn round_measure(value: f64) -> f64 {
    round_to(value, MEASURE_DECIMAL_PLACES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 3), 1.235);
        assert_eq!(round_to(-1.23449, 3), -1.234);
        assert_eq!(round_measure(10.00049), 10.0);
    }
}
