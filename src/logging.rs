/*
 * Copyright (c) 2025 Craig Hamilton and Contributors.
 * Licensed under either of
 *  - Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> OR
 *  - MIT license <http://opensource.org/licenses/MIT>
 *  at your option.
 */

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Local;
use env_logger::{Builder, Env, Logger, Target};
use log::{LevelFilter, Log, Metadata, Record};

use crate::error::{FlickrdError, Result};

// A log past this size is started over on the next run
const MAX_LOG_BYTES: u64 = 10 * 1000 * 1000;

/// Console output filtered by RUST_LOG (default `info`), and a debug trail of
/// this crate in the log file.
struct Tee {
    console: Logger,
    file: Logger,
}

impl Log for Tee {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console.enabled(metadata) || self.file.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        self.console.log(record);
        self.file.log(record);
    }

    fn flush(&self) {
        self.console.flush();
        self.file.flush();
    }
}

pub(crate) fn configure_logging(log_file: &Path) -> anyhow::Result<()> {
    let console = Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .build();
    let file = file_logger(open_log_file(log_file, MAX_LOG_BYTES)?);

    let max_level = console.filter().max(file.filter());
    log::set_boxed_logger(Box::new(Tee { console, file }))?;
    log::set_max_level(max_level);
    Ok(())
}

// [LEVEL] [file:line] date time.millis> message
fn file_logger(file: File) -> Logger {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module(env!("CARGO_CRATE_NAME"), LevelFilter::Debug)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}:{}] {}> {}",
                record.level(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .build()
}

fn open_log_file(path: &Path, max_bytes: u64) -> Result<File> {
    let start_over = std::fs::metadata(path).is_ok_and(|meta| meta.len() > max_bytes);
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(!start_over)
        .truncate(start_over)
        .open(path)
        .map_err(|e| FlickrdError::filesystem(path, e))
}
