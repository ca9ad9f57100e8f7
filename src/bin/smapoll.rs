use std::fs;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::error;

use smapoll::config::Args;
use smapoll::persistence::PostgresPersistence;
use smapoll::scheduler::{Scheduler, SchedulerConfig};

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt().with_max_level(args.log_level()).init();

    if let Some(pid_file) = &args.pid_file {
        if let Err(e) = fs::write(pid_file, std::process::id().to_string()) {
            error!(error = %e, path = %pid_file.display(), "failed to write PID file");
            return ExitCode::FAILURE;
        }
    }

    let mut persistence = match PostgresPersistence::connect(&args.database_url) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to connect to the database");
            return ExitCode::FAILURE;
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        if let Err(e) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
            error!(error = %e, "failed to install signal handler, proceeding without one");
        }
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32;
    let config = SchedulerConfig {
        endpoint: args.device.clone(),
        interval: args.interval,
        close_between_cycles: args.close_each_cycle,
        log_dir: args.log_dir.clone(),
    };
    let mut scheduler = Scheduler::new(config, now);

    match scheduler.run(&mut persistence, || stop.load(Ordering::SeqCst)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "scheduler exited with an unrecoverable error");
            ExitCode::FAILURE
        }
    }
}
