//! `loopcheck config`: show or initialise the configuration file.

use anyhow::Result;

use loopcheck_core::LoopcheckConfig;

pub fn show(config: &LoopcheckConfig) -> Result<()> {
    let path = LoopcheckConfig::file_path();
    let source = if path.exists() { "file" } else { "defaults" };
    println!("# {} ({source}, env overrides applied)", path.display());
    print!("{}", config.to_toml()?);
    Ok(())
}

pub fn init() -> Result<()> {
    let path = LoopcheckConfig::write_default_if_missing()?;
    println!("Config at {}", path.display());
    Ok(())
}
