use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::{resource, utils, MemoryUnit};

/// Input arguments for the `calculate-memory` command
#[derive(Args, Debug, Serialize, Deserialize)]
pub struct CalculateMemoryInput {
  /// Total memory available on the node
  ///
  /// Negative values are accepted by the parser so the calculator can reject
  /// them with a descriptive error instead of a usage message
  #[arg(allow_negative_numbers = true)]
  pub total_memory: f64,

  /// Unit of the total memory provided
  #[arg(long, value_enum, default_value = "GiB")]
  pub unit: MemoryUnit,

  /// Include the container image streaming reservation
  #[arg(long)]
  pub streaming: bool,
}

impl CalculateMemoryInput {
  pub async fn calculate(&self) -> Result<resource::MemoryBreakdown> {
    let total_memory_gib = match self.unit {
      MemoryUnit::Gb => utils::gb_to_gib(self.total_memory),
      MemoryUnit::Gib => self.total_memory,
    };

    resource::allocatable_memory(total_memory_gib, self.streaming)
  }

  pub async fn result(&self) -> Result<()> {
    let breakdown = self.calculate().await?;

    println!(
      "Standard reserved memory: {:.4} GiB",
      breakdown.standard_reserved_gib
    );
    if self.streaming {
      println!(
        "Container streaming reserved memory: {:.4} GiB",
        breakdown.streaming_reserved_gib
      );
    }
    println!("Reserving an additional 100 MiB for pod eviction");
    println!("Total reserved memory: {:.4} GiB", breakdown.total_reserved_gib);
    println!("Allocatable memory: {:.4} GiB", breakdown.allocatable_gib);

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use rstest::*;

  use super::*;

  #[rstest]
  #[case(4.0, MemoryUnit::Gib, false, 1.09765625, 2.90234375)]
  #[case(4.0, MemoryUnit::Gib, true, 1.09765625, 2.50234375)]
  #[case(1000.0, MemoryUnit::Gb, false, 25.484107742309572, 905.8384668731689)]
  #[tokio::test]
  async fn calculate_test(
    #[case] total_memory: f64,
    #[case] unit: MemoryUnit,
    #[case] streaming: bool,
    #[case] expected_standard: f64,
    #[case] expected_allocatable: f64,
  ) {
    let input = CalculateMemoryInput {
      total_memory,
      unit,
      streaming,
    };

    let breakdown = input.calculate().await.unwrap();
    assert!((breakdown.standard_reserved_gib - expected_standard).abs() < 1e-9);
    assert!((breakdown.allocatable_gib - expected_allocatable).abs() < 1e-9);
  }

  #[tokio::test]
  async fn negative_memory_is_rejected() {
    let input = CalculateMemoryInput {
      total_memory: -4.0,
      unit: MemoryUnit::Gib,
      streaming: false,
    };

    assert!(input.calculate().await.is_err());
  }
}
