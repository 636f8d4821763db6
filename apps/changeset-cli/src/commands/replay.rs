// replay.rs — `changeset replay`: run a script and stream events to stdout.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use changeset_cli::{replay, ReplayOptions, Script};
use changeset_core::ChangeSetConfig;

pub fn execute(
    project_root: &Path,
    script_path: &Path,
    root: Option<&Path>,
    events: Option<&Path>,
) -> anyhow::Result<()> {
    let config = ChangeSetConfig::load_from_project(project_root)
        .with_context(|| format!("failed to load config under {}", project_root.display()))?;
    let script = Script::load(script_path)?;

    let options = ReplayOptions {
        root: root.unwrap_or(project_root).to_path_buf(),
        events_log: events.map(Path::to_path_buf),
        config,
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let report = replay(&script, &options, &mut out)?;
    out.flush()?;

    tracing::info!(
        steps = report.steps,
        events = report.events.len(),
        elements = report.summary.elements.len(),
        "replay finished"
    );
    for element in &report.summary.elements {
        eprintln!(
            "  {} [{}]",
            element.locator,
            element
                .state
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}
