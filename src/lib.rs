use anyhow::Result;
use aws_config::retry::RetryConfig;
use aws_config::{ConfigLoader, Region, SdkConfig};
use log::LevelFilter;

pub mod config;
pub mod deploy;
pub mod gateway;
pub mod logs;
pub mod output;
pub mod permissions;
pub mod probe;
pub mod tables;

pub const APP_NAME: &str = "hr_ops";

pub fn set_up_logger(calling_module: &str, verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(LevelFilter::Warn)
        .level_for(APP_NAME, level)
        .level_for(calling_module.to_string(), level)
        .chain(std::io::stderr())
        .apply()?;

    Ok(())
}

/// Loads the shared AWS config for `region` using the ambient credential chain.
pub async fn load_sdk_config(region: &str) -> SdkConfig {
    ConfigLoader::default()
        .region(Region::new(region.to_string()))
        .retry_config(RetryConfig::standard())
        .load()
        .await
}
