use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::config::IntentWorkflowConfig;

pub struct InitConfigCommand {
    pub path: PathBuf,
    pub force: bool,
}

impl InitConfigCommand {
    pub fn new(path: PathBuf, force: bool) -> Self {
        Self { path, force }
    }

    /// Write `config` (defaults merged with whatever sources were found)
    pub fn execute(&self, config: &IntentWorkflowConfig) -> Result<()> {
        if self.path.exists() && !self.force {
            bail!(
                "{} already exists; pass --force to overwrite it",
                self.path.display()
            );
        }
        config.save_to_file(&self.path)?;
        println!("✅ Wrote {}", self.path.display());
        Ok(())
    }
}
