pub mod aggregation;
pub mod monthly_reset;

pub use aggregation::{AggregationJob, AggregationStats};
pub use monthly_reset::MonthlyResetJob;
