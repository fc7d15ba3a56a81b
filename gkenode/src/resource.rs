use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One row of a memory reservation schedule
///
/// For the slice of memory between the previous tier's threshold and this one,
/// `percentage` of that slice is reserved. The first tier of a schedule is an
/// exception: it is a flat amount (`percentage * threshold_gib`) applied to any
/// machine at or below its threshold, not a rate over a slice.
#[derive(Clone, Copy, Debug)]
pub struct MemoryTier {
  pub threshold_gib: f64,
  pub percentage: f64,
  pub description: &'static str,
}

/// Standard GKE memory reservation schedule
///
/// 255 MiB flat for machines with less than 1 GiB of memory, otherwise:
/// 25% of the first 4 GiB
/// 20% of the next 4 GiB (up to 8 GiB)
/// 10% of the next 8 GiB (up to 16 GiB)
/// 6% of the next 112 GiB (up to 128 GiB)
/// 2% of any memory above 128 GiB
pub const STANDARD_MEMORY_TIERS: &[MemoryTier] = &[
  MemoryTier {
    threshold_gib: 1.0,
    percentage: 255.0 / 1024.0,
    description: "reserving a flat 255 MiB",
  },
  MemoryTier {
    threshold_gib: 4.0,
    percentage: 0.25,
    description: "reserving 25% of the first 4 GiB",
  },
  MemoryTier {
    threshold_gib: 8.0,
    percentage: 0.20,
    description: "reserving 20% of the next 4 GiB",
  },
  MemoryTier {
    threshold_gib: 16.0,
    percentage: 0.10,
    description: "reserving 10% of the next 8 GiB",
  },
  MemoryTier {
    threshold_gib: 128.0,
    percentage: 0.06,
    description: "reserving 6% of the next 112 GiB",
  },
  MemoryTier {
    threshold_gib: f64::INFINITY,
    percentage: 0.02,
    description: "reserving 2% of any memory above 128 GiB",
  },
];

/// Container image streaming memory reservation schedule
///
/// Applied in addition to the standard schedule when image streaming is
/// enabled on the node pool:
/// nothing for machines with less than 1 GiB of memory, otherwise:
/// 10% of the first 4 GiB
/// 8% of the next 4 GiB (up to 8 GiB)
/// 4% of the next 8 GiB (up to 16 GiB)
/// 2.4% of the next 112 GiB (up to 128 GiB)
/// 0.8% of any memory above 128 GiB
pub const STREAMING_MEMORY_TIERS: &[MemoryTier] = &[
  MemoryTier {
    threshold_gib: 1.0,
    percentage: 0.0,
    description: "no additional memory reserved for container streaming",
  },
  MemoryTier {
    threshold_gib: 4.0,
    percentage: 0.10,
    description: "reserving 10% of the first 4 GiB for container streaming",
  },
  MemoryTier {
    threshold_gib: 8.0,
    percentage: 0.08,
    description: "reserving 8% of the next 4 GiB for container streaming",
  },
  MemoryTier {
    threshold_gib: 16.0,
    percentage: 0.04,
    description: "reserving 4% of the next 8 GiB for container streaming",
  },
  MemoryTier {
    threshold_gib: 128.0,
    percentage: 0.024,
    description: "reserving 2.4% of the next 112 GiB for container streaming",
  },
  MemoryTier {
    threshold_gib: f64::INFINITY,
    percentage: 0.008,
    description: "reserving 0.8% of any memory above 128 GiB for container streaming",
  },
];

/// Fixed reservation held back for the pod eviction threshold, in GiB (100 MiB)
pub const EVICTION_THRESHOLD_GIB: f64 = 100.0 / 1024.0;

/// Calculates the memory to reserve in gibibytes (GiB) for a given schedule
///
/// Walks the schedule in threshold order, reserving each tier's percentage of
/// the slice it covers and stopping in the tier the total falls in. A total
/// equal to a tier threshold is charged at that tier's rate, not the next.
///
/// The first tier is a flat minimum for machines at or below 1 GiB; above
/// that, the second tier's rate covers the whole span from zero (e.g. 25% of
/// the first 4 GiB on the standard schedule).
pub fn tiered_reserve(total_memory_gib: f64, schedule: &[MemoryTier]) -> Result<f64> {
  if total_memory_gib < 0.0 {
    bail!("total memory must be non-negative, got {total_memory_gib} GiB");
  }

  let (first, rest) = match schedule.split_first() {
    Some(split) => split,
    None => bail!("memory reservation schedule is empty"),
  };

  if total_memory_gib <= first.threshold_gib {
    debug!(
      "Machine has {total_memory_gib:.2} GiB of memory, {}",
      first.description
    );
    return Ok(first.percentage * first.threshold_gib);
  }

  let mut reserved = 0.0;
  let mut last_threshold = 0.0;

  for tier in rest {
    if total_memory_gib > tier.threshold_gib {
      reserved += tier.percentage * (tier.threshold_gib - last_threshold);
      last_threshold = tier.threshold_gib;
    } else {
      reserved += tier.percentage * (total_memory_gib - last_threshold);
      debug!(
        "Machine has {total_memory_gib:.2} GiB of memory, {}",
        tier.description
      );
      break;
    }
  }

  Ok(reserved)
}

/// Calculates the standard reserved memory in gibibytes (GiB)
///
/// The fixed pod eviction reservation is always included on top of the
/// standard schedule, whether or not image streaming is considered.
pub fn standard_reserved_gib(total_memory_gib: f64) -> Result<f64> {
  let reserved = tiered_reserve(total_memory_gib, STANDARD_MEMORY_TIERS)?;
  Ok(reserved + EVICTION_THRESHOLD_GIB)
}

/// Calculates the container image streaming reserved memory in gibibytes (GiB)
pub fn streaming_reserved_gib(total_memory_gib: f64) -> Result<f64> {
  tiered_reserve(total_memory_gib, STREAMING_MEMORY_TIERS)
}

/// Breakdown of reserved and allocatable memory on a node, in GiB
///
/// `allocatable_gib` is signed: a machine with less memory than the fixed
/// minimum reservation yields a negative value, which is reported as-is so
/// under-provisioned nodes can be detected downstream.
#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryBreakdown {
  pub standard_reserved_gib: f64,
  pub streaming_reserved_gib: f64,
  pub total_reserved_gib: f64,
  pub allocatable_gib: f64,
}

/// Calculates the full memory breakdown for a node
///
/// The streaming reservation is included only when `consider_streaming` is
/// set; it is reported as zero otherwise.
pub fn allocatable_memory(total_memory_gib: f64, consider_streaming: bool) -> Result<MemoryBreakdown> {
  let standard_reserved_gib = standard_reserved_gib(total_memory_gib)?;
  let streaming_reserved_gib = match consider_streaming {
    true => streaming_reserved_gib(total_memory_gib)?,
    false => 0.0,
  };
  let total_reserved_gib = standard_reserved_gib + streaming_reserved_gib;

  Ok(MemoryBreakdown {
    standard_reserved_gib,
    streaming_reserved_gib,
    total_reserved_gib,
    allocatable_gib: total_memory_gib - total_reserved_gib,
  })
}

#[cfg(test)]
mod tests {
  use rstest::*;

  use super::*;

  const TOLERANCE: f64 = 1e-12;

  #[rstest]
  #[case(0.0, 0.3466796875)] // 255/1024 + 100/1024
  #[case(0.5, 0.3466796875)]
  #[case(1.0, 0.3466796875)] // boundary stays in the flat tier
  #[case(2.0, 0.59765625)]
  #[case(4.0, 1.09765625)] // 0.25 * 4 + 100/1024
  #[case(8.0, 1.89765625)]
  #[case(16.0, 2.69765625)]
  #[case(100.0, 7.73765625)]
  #[case(128.0, 9.41765625)]
  #[case(200.0, 10.85765625)] // 0.25*4 + 0.20*4 + 0.10*8 + 0.06*112 + 0.02*72 + 100/1024
  fn standard_reserved_gib_test(#[case] total: f64, #[case] expected: f64) {
    let result = standard_reserved_gib(total).unwrap();
    assert!((result - expected).abs() < TOLERANCE, "got {result}, expected {expected}");
  }

  #[rstest]
  #[case(0.0, 0.0)]
  #[case(1.0, 0.0)]
  #[case(2.0, 0.2)]
  #[case(4.0, 0.4)]
  #[case(8.0, 0.72)]
  #[case(16.0, 1.04)]
  #[case(128.0, 3.728)]
  #[case(200.0, 4.304)]
  fn streaming_reserved_gib_test(#[case] total: f64, #[case] expected: f64) {
    let result = streaming_reserved_gib(total).unwrap();
    assert!((result - expected).abs() < TOLERANCE, "got {result}, expected {expected}");
  }

  // A total sitting exactly on a threshold is charged at that tier's rate,
  // one bit above it at the next tier's rate
  #[rstest]
  #[case(4.0)]
  #[case(8.0)]
  #[case(16.0)]
  #[case(128.0)]
  fn threshold_belongs_to_lower_tier_test(#[case] threshold: f64) {
    let at = tiered_reserve(threshold, STANDARD_MEMORY_TIERS).unwrap();
    let above = tiered_reserve(threshold + 1e-9, STANDARD_MEMORY_TIERS).unwrap();
    assert!(above >= at);
    assert!(above - at < 1e-6);
  }

  #[test]
  fn standard_reserved_is_non_decreasing() {
    let mut last = 0.0;
    for i in 0..=2560 {
      let total = i as f64 * 0.1;
      let reserved = standard_reserved_gib(total).unwrap();
      assert!(reserved >= last, "reservation decreased at {total} GiB");
      last = reserved;
    }
  }

  #[test]
  fn eviction_floor_always_included() {
    for total in [0.0, 0.25, 1.0, 3.0, 42.0, 512.0] {
      assert!(standard_reserved_gib(total).unwrap() >= EVICTION_THRESHOLD_GIB);
    }
  }

  #[rstest]
  #[case(-1.0)]
  #[case(-0.0001)]
  fn negative_total_is_rejected(#[case] total: f64) {
    assert!(tiered_reserve(total, STANDARD_MEMORY_TIERS).is_err());
    assert!(standard_reserved_gib(total).is_err());
    assert!(streaming_reserved_gib(total).is_err());
  }

  #[test]
  fn allocatable_memory_without_streaming() {
    let breakdown = allocatable_memory(200.0, false).unwrap();
    assert!((breakdown.standard_reserved_gib - 10.85765625).abs() < TOLERANCE);
    assert_eq!(breakdown.streaming_reserved_gib, 0.0);
    assert!((breakdown.total_reserved_gib - 10.85765625).abs() < TOLERANCE);
    assert!((breakdown.allocatable_gib - 189.14234375).abs() < TOLERANCE);
  }

  #[test]
  fn allocatable_memory_with_streaming() {
    let breakdown = allocatable_memory(200.0, true).unwrap();
    assert!((breakdown.streaming_reserved_gib - 4.304).abs() < TOLERANCE);
    assert!((breakdown.total_reserved_gib - 15.16165625).abs() < TOLERANCE);
    assert!((breakdown.allocatable_gib - 184.83834375).abs() < TOLERANCE);
  }

  // A node with less memory than the fixed minimum reservation reports a
  // negative allocatable value rather than clamping to zero
  #[test]
  fn allocatable_memory_may_be_negative() {
    let breakdown = allocatable_memory(0.0, false).unwrap();
    assert!((breakdown.allocatable_gib + 0.3466796875).abs() < TOLERANCE);
  }
}
