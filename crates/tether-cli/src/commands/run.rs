//! Run command - execute script files on a pool.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use std::path::PathBuf;
use std::thread;
use tether_runtime::{Pool, TetherError};

use super::define_print;
use crate::config::Config;

#[derive(Args)]
pub struct RunCommand {
    /// Files to execute, each on the first free context
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Number of contexts (default: [pool] size, then CPU count)
    #[arg(long)]
    pub pool: Option<usize>,

    /// Script run in every context before the files
    #[arg(long)]
    pub setup: Option<PathBuf>,
}

impl RunCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let pool = Pool::with_config(config.pool_config(self.pool))?;
        tracing::debug!(size = pool.size(), files = self.files.len(), "running scripts");
        define_print(&pool)?;

        if let Some(setup) = &self.setup {
            pool.exec_file_all(setup)
                .with_context(|| format!("setup script {} failed", setup.display()))?;
        }

        let results: Vec<(&PathBuf, Result<(), TetherError>)> = thread::scope(|scope| {
            let pool = &pool;
            let running: Vec<_> = self
                .files
                .iter()
                .map(|file| (file, scope.spawn(move || pool.exec_file(file))))
                .collect();
            running
                .into_iter()
                .map(|(file, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(TetherError::internal("script runner thread panicked"))
                    });
                    (file, result)
                })
                .collect()
        });

        let mut failed = 0;
        for (file, result) in &results {
            if let Err(err) = result {
                failed += 1;
                match err.report() {
                    Some(report) => eprintln!("{report}"),
                    None => eprintln!("{}: {err}", file.display()),
                }
            }
        }

        let stats = pool.stats().snapshot();
        tracing::debug!(
            completed = stats.jobs_completed,
            failed = stats.jobs_failed,
            "pool finished"
        );

        if failed > 0 {
            bail!("{failed} of {} scripts failed", results.len());
        }
        Ok(())
    }
}
