pub mod cli;
pub mod commands;
pub mod resource;
pub mod utils;

use clap::ValueEnum;
pub use cli::{Cli, Commands};
use serde::{Deserialize, Serialize};

/// Unit of measure for a memory quantity provided as input
#[derive(Copy, Clone, Debug, ValueEnum, Serialize, Deserialize)]
pub enum MemoryUnit {
  /// Gigabytes (10^9 bytes)
  #[value(name = "GB")]
  Gb,

  /// Gibibytes (2^30 bytes)
  #[value(name = "GiB")]
  Gib,
}

impl Default for MemoryUnit {
  fn default() -> Self {
    Self::Gib
  }
}
