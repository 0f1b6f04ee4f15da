//! Background jobs
//!
//! - Periodic campaign progress check, refreshing the interim progress cache

mod progress_check;

pub use progress_check::{CampaignSource, LastTick, ProgressCheckScheduler, StaticCampaignSource, TickSummary};
