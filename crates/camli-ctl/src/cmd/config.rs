//! `config`: write the default file if missing and show effective settings.

use anyhow::{Context, Result};

use camli_core::CamliConfig;

use crate::Options;

pub fn run(opts: &Options) -> Result<()> {
    if !opts.config_path.exists() {
        if let Some(parent) = opts.config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(&CamliConfig::default())?;
        std::fs::write(&opts.config_path, text)
            .with_context(|| format!("failed to write {}", opts.config_path.display()))?;
        println!("Wrote default config to {}", opts.config_path.display());
    }

    let mut shown = opts.config.clone();
    if !shown.store.password.is_empty() {
        shown.store.password = "********".to_string();
    }

    println!("# {}", opts.config_path.display());
    print!("{}", toml::to_string_pretty(&shown)?);

    if let Err(e) = opts.config.validate() {
        println!();
        println!("warning: {e}");
    }
    Ok(())
}
