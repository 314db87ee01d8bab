//! Sharpbot cron — scheduled jobs that prompt the agent.
//!
//! - [`types`] — schedules (`at` / `every` / `cron`), payloads, job state,
//!   and the JSON-persisted store
//! - [`service`] — the async scheduler: sleeps until the nearest job, fires
//!   due jobs through a callback into the agent, optionally delivers results
//!   over the bus

pub mod service;
pub mod types;

pub use service::{CronService, OnJobFn};
pub use types::{CronJob, CronPayload, CronSchedule, CronStore, JobStatus, ScheduleKind};
