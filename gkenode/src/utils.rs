/// Bytes in a gigabyte (10^9)
const BYTES_PER_GB: f64 = 1_000_000_000.0;

/// Bytes in a gibibyte (2^30)
const BYTES_PER_GIB: f64 = 1_073_741_824.0;

/// Convert gigabytes to gibibytes
///
/// The result is exact f64 arithmetic; it is not rounded before being fed
/// into a reservation schedule
pub fn gb_to_gib(gb: f64) -> f64 {
  gb * BYTES_PER_GB / BYTES_PER_GIB
}
