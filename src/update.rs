use std::process::Command;

use anyhow::{bail, Context, Result};

use crate::config::UpdateConfig;

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("update step {step:?} failed ({status})")]
    StepFailed { step: String, status: String },
}

pub fn steps(cfg: &UpdateConfig, download_images: bool) -> Vec<Vec<String>> {
    let mut steps = cfg.steps.clone();
    if download_images {
        steps.extend(cfg.image_steps.iter().cloned());
    }
    steps.retain(|step| !step.is_empty());
    steps
}

pub fn run_pipeline(cfg: &UpdateConfig, download_images: bool) -> Result<()> {
    let steps = steps(cfg, download_images);
    if steps.is_empty() {
        bail!("update: no steps configured");
    }
    for step in &steps {
        let shown = step.join(" ");
        tracing::info!(step = %shown, "update: running step");
        let status = Command::new(&step[0])
            .args(&step[1..])
            .status()
            .with_context(|| format!("update: start {shown}"))?;
        if !status.success() {
            return Err(UpdateError::StepFailed {
                step: shown,
                status: status.to_string(),
            }
            .into());
        }
    }
    tracing::info!(steps = steps.len(), "update: pipeline finished");
    Ok(())
}
