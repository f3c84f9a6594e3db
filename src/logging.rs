use crate::{config::RegistryConfig, render::RenderSummary};
use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use log::{LevelFilter, Metadata, Record};
use std::sync::{Arc, Mutex};

struct RegistryLogger;

static LOGGER: RegistryLogger = RegistryLogger;

pub fn init(level: LevelFilter) -> Result<()> {
    match log::set_logger(&LOGGER) {
        Ok(_) => log::set_max_level(level),
        Err(_) => bail!("Logger initalization failed"),
    };

    Ok(())
}

lazy_static! {
    pub(crate) static ref LOG_RECORDS: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
}

impl log::Log for RegistryLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_string = format!(
                "{} - {} - {}:{}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            );

            {
                let mut log_records = match LOG_RECORDS.lock() {
                    Ok(log_records) => log_records,
                    Err(err) => {
                        println!("Failed to lock log records: {}", err);
                        return;
                    }
                };
                log_records.push(log_string.clone());
            }

            println!("{}", log_string);
        }
    }

    fn flush(&self) {}
}

#[derive(serde::Serialize)]
struct Summary<'a> {
    config: &'a RegistryConfig,
    render: &'a RenderSummary,
    logs: Vec<String>,
}

pub fn generate_summary(config: &RegistryConfig, render: &RenderSummary) -> Result<()> {
    let Some(summary_file) = &config.summary_file else {
        return Ok(());
    };

    let logs = match LOG_RECORDS.lock() {
        Ok(logs) => logs.clone(),
        Err(err) => {
            vec![format!("Failed to lock log records: {}", err)]
        }
    };

    let summary = Summary { config, render, logs };

    let summary_file = summary_file.0.clone().create().context("opening summary file for writing")?;
    serde_yaml::to_writer(summary_file, &summary).context("serializing summary file")?;

    Ok(())
}
