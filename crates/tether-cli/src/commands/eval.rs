//! Eval command - evaluate one expression in a fresh context.

use anyhow::Result;
use clap::Args;
use serde_json::Value;
use tether_runtime::{Context, Raw};

use super::define_print;
use crate::config::Config;

#[derive(Args)]
pub struct EvalCommand {
    /// Script source; its completion value is printed
    pub source: String,

    /// Print the engine's JSON text untouched instead of pretty-printing it
    #[arg(long)]
    pub raw: bool,
}

impl EvalCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let cx = Context::with_config(config.context.clone())?;
        define_print(&cx)?;

        if self.raw {
            let result: Raw = cx.eval(&self.source)?;
            println!("{result}");
        } else {
            let result: Value = cx.eval(&self.source)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Ok(())
    }
}
