//! Benchmark configuration file

use anyhow::{bail, Context, Result};
use pdfbench::batch::BatchOptions;
use pdfbench::capability::ToolOptions;
use pdfbench::fingerprint::PageSelection;
use pdfbench::reports::ReportOptions;
use pdfbench::tools::{ToolRegistry, ToolSpec};
use pdfbench::ValidationTolerance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

fn default_timeout() -> f64 {
    300.0
}

fn default_compare_timeout() -> Option<f64> {
    Some(60.0)
}

fn default_cache_renders() -> bool {
    true
}

fn default_chaos_runs() -> usize {
    3
}

/// Contents of a `pdfbench.json` file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    /// Worker threads; the number of CPUs when absent
    #[serde(default)]
    pub workers: Option<usize>,
    /// Deadline of one unit of work
    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,
    /// Deadline of one page comparison; `null` disables it
    #[serde(default = "default_compare_timeout")]
    pub compare_timeout_secs: Option<f64>,
    /// Pages hashed into render fingerprints
    #[serde(default)]
    pub page_hash: PageSelection,
    /// Keep renders for the whole session instead of re-rendering per use
    #[serde(default = "default_cache_renders")]
    pub cache_renders: bool,
    #[serde(default = "default_chaos_runs")]
    pub chaos_runs: usize,
    #[serde(default)]
    pub tolerance: ValidationTolerance,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            workers: None,
            timeout_secs: default_timeout(),
            compare_timeout_secs: default_compare_timeout(),
            page_hash: PageSelection::default(),
            cache_renders: default_cache_renders(),
            chaos_runs: default_chaos_runs(),
            tolerance: ValidationTolerance::default(),
            tools: Vec::new(),
        }
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{name} must be a positive number of seconds, got {value}");
    }
    Ok(Duration::from_secs_f64(value))
}

impl BenchConfig {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: BenchConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, workers: Option<usize>, timeout_secs: Option<f64>) -> Result<Self> {
        if workers.is_some() {
            self.workers = workers;
        }
        if let Some(timeout) = timeout_secs {
            self.timeout_secs = timeout;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            bail!("workers must be at least 1");
        }
        seconds("timeout_secs", self.timeout_secs)?;
        if let Some(limit) = self.compare_timeout_secs {
            seconds("compare_timeout_secs", limit)?;
        }

        let mut names = BTreeSet::new();
        for spec in &self.tools {
            spec.validate()
                .with_context(|| format!("Invalid tool '{}'", spec.name))?;
            if !names.insert(spec.name.as_str()) {
                bail!("duplicate tool name '{}'", spec.name);
            }
        }
        Ok(())
    }

    pub fn registry(&self) -> Result<ToolRegistry> {
        ToolRegistry::from_specs(self.tools.iter().cloned()).context("Failed to build tool registry")
    }

    /// Report options for the configured limits
    pub fn report_options(&self) -> Result<ReportOptions> {
        let timeout = seconds("timeout_secs", self.timeout_secs)?;
        let compare_timeout = match self.compare_timeout_secs {
            Some(limit) => Some(seconds("compare_timeout_secs", limit)?),
            None => None,
        };

        let mut batch = BatchOptions::default().with_job_timeout(timeout);
        if let Some(workers) = self.workers {
            batch = batch.with_parallelism(workers);
        }
        let mut tool_options = ToolOptions::default().with_timeout(timeout);
        tool_options.cache_renders = self.cache_renders;

        Ok(ReportOptions::default()
            .with_batch(batch)
            .with_tool_options(tool_options)
            .with_tolerance(self.tolerance)
            .with_pages(self.page_hash)
            .with_compare_timeout(compare_timeout)
            .with_chaos_runs(self.chaos_runs))
    }
}
