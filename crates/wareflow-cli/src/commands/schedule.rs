//! Schedule command
//!
//! Usage: wareflow schedule [--once]

use crate::commands::{CliResult, Env};
use clap::Args;
use std::time::Duration;
use wareflow_core::clock::SystemClock;
use wareflow_core::notify::{NoopNotifier, Notifier};
use wareflow_engine::commands::load::LoadOptions;
use wareflow_engine::scheduler::Scheduler;
use wareflow_engine::telegram::TelegramNotifier;

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    /// Run a single scheduled load and exit
    #[arg(long)]
    pub once: bool,
}

pub fn execute(env: &Env, args: ScheduleArgs) -> CliResult {
    let mut conn = env.open_database()?;
    let notifier: Box<dyn Notifier> = match &env.config.telegram {
        Some(telegram) => Box::new(TelegramNotifier::new(telegram)?),
        None => Box::new(NoopNotifier),
    };
    let clock = SystemClock;
    let scheduler = Scheduler {
        interval: Duration::from_secs(env.config.schedule.interval_secs),
        retry: env.config.retry.clone(),
        notifier: notifier.as_ref(),
        options: LoadOptions {
            user_traffic_csv: env.config.user_traffic_csv.as_deref(),
            clock: &clock,
        },
    };

    if args.once {
        let report = scheduler.run_once(&mut conn)?;
        println!("✓ {}", report.status_message());
        return Ok(());
    }
    scheduler.run_forever(&mut conn)
}
