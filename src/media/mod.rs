// Post-download media handling: duration probing and size-budget compression

pub mod compress;
pub mod probe;

pub use compress::{CompressionError, CompressionPlan, SizeBudgetCompressor};
pub use probe::{DurationProbe, FfprobeDuration};
