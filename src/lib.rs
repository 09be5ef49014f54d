use anyhow::Context;

pub mod commands;
pub mod config;
pub mod media_info;
pub mod metrics;
pub mod process;
pub mod report;
pub mod sweep;
pub mod util;

pub fn run(config: &config::Config) -> anyhow::Result<()> {
    sweep::run(config).context("Failed to run quality comparison sweep")?;

    Ok(())
}
