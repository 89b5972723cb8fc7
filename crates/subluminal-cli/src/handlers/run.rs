use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use subluminal_runtime::{ProxyOptions, RuntimeConfig, run_proxy};

pub fn handle(
    policy_file: Option<PathBuf>,
    ledger: Option<PathBuf>,
    command: Vec<String>,
) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        bail!("run requires an upstream command");
    };

    let mut config = RuntimeConfig::from_env();
    if policy_file.is_some() {
        config.policy_inline = None;
        config.policy_path = policy_file;
    }

    let mut options = ProxyOptions::new(config, program.clone(), args.to_vec());
    if let Some(path) = ledger {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open ledger file {}", path.display()))?;
        options.events_tee = Some(Box::new(file));
    }

    run_proxy(options).context("proxy session failed")?;
    Ok(())
}
