/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use flexi_logger::{colored_opt_format, Age, Cleanup, Criterion, FileSpec, Logger, Naming};
use log::info;
#[cfg(unix)]
use signal_hook::{consts::TERM_SIGNALS, iterator::Signals};

use ipfix_exporter::{Agent, Config};

const LOG_RETENTION: usize = 7;

#[derive(Parser)]
struct Opts {
    /// Specify config file location
    #[clap(short = 'f', long, default_value = "/etc/ipfix-exporter.yaml")]
    config_file: String,

    /// Display the version
    #[clap(short, long, action = ArgAction::SetTrue)]
    version: bool,
}

#[cfg(unix)]
fn wait_on_signals() {
    let mut signals = Signals::new(TERM_SIGNALS).unwrap();
    signals.forever().next();
    signals.handle().close();
}

#[cfg(windows)]
fn wait_on_signals() {}

fn main() -> Result<()> {
    let opts = Opts::parse();
    if opts.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(&opts.config_file)
        .with_context(|| format!("loading config from {}", opts.config_file))?;

    let logger = Logger::try_with_env_or_str(&config.log_level)
        .context("invalid log level")?
        .format(colored_opt_format);
    let base_path = Path::new(&config.log_file).parent();
    let write_to_file = match base_path {
        Some(base_path) if base_path.exists() => true,
        Some(base_path) => fs::create_dir_all(base_path).is_ok(),
        None => false,
    };
    let logger = if write_to_file {
        logger
            .log_to_file(FileSpec::try_from(&config.log_file)?)
            .rotate(
                Criterion::Age(Age::Day),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(LOG_RETENTION),
            )
            .append()
            .duplicate_to_stderr(flexi_logger::Duplicate::All)
    } else {
        eprintln!(
            "log file path '{}' not writable, logging to stderr only",
            config.log_file
        );
        logger.log_to_stderr()
    };
    let _logger_handle = logger.start()?;

    info!("config {:#?}", config);

    let mut agent = Agent::new(config)?;
    agent.start();

    wait_on_signals();

    agent.stop();
    Ok(())
}
