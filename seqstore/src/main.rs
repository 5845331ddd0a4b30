use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{debug, info, LevelFilter};

use crate::utils::create_temp_dir;

mod cli;
mod commands;
mod utils;

fn setup_logging(quiet: u8, verbose: u8) {
    let sum = verbose as i16 - quiet as i16;
    let lvl = match sum {
        1 => LevelFilter::Debug,
        2.. => LevelFilter::Trace,
        -1 => LevelFilter::Warn,
        -2 => LevelFilter::Error,
        i if i < -2 => LevelFilter::Off,
        _ => LevelFilter::Info,
    };
    let mut log_builder = env_logger::Builder::new();
    log_builder.filter(None, lvl);
    log_builder.init();
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    setup_logging(args.quiet, args.verbose);
    debug!("{:?}", args);

    // SIGINT sets a flag that the pipelines sample at iteration boundaries;
    // they bail out with a cancellation error and partial outputs are
    // removed.
    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })?;

    match &args.command {
        cli::Command::Create(create_args) => {
            let tmpdir = create_temp_dir(create_args.temp_dir.as_ref())?;
            debug!("created temporary directory at {:?}", tmpdir.path());
            let result = commands::create(create_args, tmpdir.path(), cancel);
            if create_args.keep_temp {
                let path = tmpdir.into_path();
                info!("keeping temporary directory {}", path.display());
            }
            result
        }
        cli::Command::Merge(merge_args) => {
            let tmpdir = create_temp_dir(merge_args.temp_dir.as_ref())?;
            debug!("created temporary directory at {:?}", tmpdir.path());
            let result = commands::merge(merge_args, tmpdir.path(), cancel);
            if merge_args.keep_temp {
                let path = tmpdir.into_path();
                info!("keeping temporary directory {}", path.display());
            }
            result
        }
        cli::Command::MigrateReadmap(migrate_args) => {
            commands::migrate_readmap(migrate_args, cancel)
        }
    }
}
