//! Run configuration: a TOML file with a `[PARAMETERS]` table and one
//! `[[datasets]]` entry per propagation job.
//!
//! ```toml
//! [PARAMETERS]
//! DataFolder = "./data"
//! NodeUrl = "http://localhost:8545"
//!
//! [[datasets]]
//! name = "upbit-hack"
//! start_block = 8990000
//! block_count = 2000
//! seed_accounts = ["0xa09871AEadF4994Ca12f5c0b6056BBd1d343c029"]
//! permanent_taint = false
//! ```

use std::path::{Path, PathBuf};

use alloy_primitives::Address;
use eyre::WrapErr;
use serde::Deserialize;

use crate::propagator::Job;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(rename = "PARAMETERS")]
    pub parameters: Parameters,
    #[serde(default)]
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Deserialize)]
pub struct Parameters {
    #[serde(rename = "DataFolder")]
    pub data_folder: PathBuf,
    #[serde(rename = "NodeUrl")]
    pub node_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub start_block: u64,
    pub block_count: u64,
    pub seed_accounts: Vec<Address>,
    #[serde(default)]
    pub permanent_taint: bool,
}

impl Dataset {
    pub fn to_job(&self) -> Job {
        Job {
            name: self.name.clone(),
            start_block: self.start_block,
            block_count: self.block_count,
            seed_accounts: self.seed_accounts.clone(),
            permanent_taint: self.permanent_taint,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> eyre::Result<Config> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).wrap_err_with(|| format!("parsing config {}", path.display()))
    }
}
