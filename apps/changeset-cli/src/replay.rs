// replay.rs — Drive a ChangeSet of FileElements through a script.
//
// Every aggregate event the set fires is written to `out` as one JSON line,
// in the order fired. Events are buffered by the subscription and flushed
// after each step, since listeners cannot borrow the writer.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context};
use changeset_core::{
    ChangeSet, ChangeSetConfig, ChangeSetElement, ChangeSetEvent, ChangeSetSummary, Locator,
    Subscription,
};

use crate::file_element::FileElement;
use crate::script::{ElementSpec, Script, Step};

/// Where replay output goes.
pub struct ReplayOptions {
    /// Directory that `fs://workspace/` locators resolve against.
    pub root: PathBuf,
    /// Optional JSONL file that also receives every event.
    pub events_log: Option<PathBuf>,
    pub config: ChangeSetConfig,
}

/// Outcome of a replay.
#[derive(Debug)]
pub struct ReplayReport {
    pub steps: usize,
    pub events: Vec<ChangeSetEvent>,
    /// Snapshot taken just before the final dispose.
    pub summary: ChangeSetSummary,
}

struct Recorder {
    buffer: Arc<Mutex<Vec<ChangeSetEvent>>>,
    _subscription: Subscription,
}

impl Recorder {
    fn attach(change_set: &ChangeSet) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscription = Self::subscribe(change_set, &buffer);
        Self {
            buffer,
            _subscription: subscription,
        }
    }

    /// Follow a different change set, keeping the buffer.
    fn reattach(&mut self, change_set: &ChangeSet) {
        self._subscription = Self::subscribe(change_set, &self.buffer);
    }

    fn subscribe(
        change_set: &ChangeSet,
        buffer: &Arc<Mutex<Vec<ChangeSetEvent>>>,
    ) -> Subscription {
        let sink = Arc::clone(buffer);
        change_set.on_did_change(move |event| lock(&sink).push(event.clone()))
    }

    fn drain(&self) -> Vec<ChangeSetEvent> {
        std::mem::take(&mut *lock(&self.buffer))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn replay(
    script: &Script,
    options: &ReplayOptions,
    out: &mut dyn Write,
) -> anyhow::Result<ReplayReport> {
    let mut change_set = ChangeSet::with_config(&script.title, Vec::new(), options.config.clone());
    let mut recorder = Recorder::attach(&change_set);
    let mut all_events = Vec::new();

    tracing::info!(
        changeset_id = %change_set.id(),
        title = %script.title,
        steps = script.steps.len(),
        "replaying script"
    );

    for (number, step) in script.steps.iter().enumerate() {
        tracing::debug!(step = number, op = step.name(), "running step");
        let result = run_step(&mut change_set, &mut recorder, step, &options.root, out);

        // Flush whatever fired, even when the step failed part way.
        let events = recorder.drain();
        emit(&events, options, out)?;
        all_events.extend(events);

        result.with_context(|| format!("step {} ({}) failed", number, step.name()))?;
    }

    let summary = change_set.summary();
    change_set.dispose();

    Ok(ReplayReport {
        steps: script.steps.len(),
        events: all_events,
        summary,
    })
}

fn run_step(
    change_set: &mut ChangeSet,
    recorder: &mut Recorder,
    step: &Step,
    root: &Path,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match step {
        Step::Add { elements } => {
            let built = elements
                .iter()
                .map(|spec| build_element(spec, root))
                .collect::<anyhow::Result<Vec<_>>>()?;
            change_set.add_elements(built)?;
        }
        Step::Remove { indices } => change_set.remove_elements(indices)?,
        Step::RemoveMatching { pattern } => {
            let indices = change_set.indices_matching(pattern);
            change_set.remove_elements(&indices)?;
        }
        Step::Apply { index } => element_at(change_set, *index)?.apply()?,
        Step::Revert { index } => element_at(change_set, *index)?.revert()?,
        Step::Open { index } => element_at(change_set, *index)?.open()?,
        Step::OpenChange { index } => element_at(change_set, *index)?.open_change()?,
        Step::Copy => {
            let copy = change_set.copy()?;
            change_set.dispose();
            *change_set = copy;
            recorder.reattach(change_set);
        }
        Step::List => {
            let summary = serde_json::to_string(&change_set.summary())?;
            writeln!(out, "{}", summary)?;
        }
    }
    Ok(())
}

fn build_element(spec: &ElementSpec, root: &Path) -> anyhow::Result<Arc<dyn ChangeSetElement>> {
    let locator = Locator::parse(&spec.uri)?;
    let mut element = FileElement::new(locator, root, spec.kind, spec.content.clone())?;
    if let Some(name) = &spec.name {
        element = element.with_name(name.clone());
    }
    let element: Arc<dyn ChangeSetElement> = Arc::new(element);
    Ok(element)
}

fn element_at(change_set: &ChangeSet, index: usize) -> anyhow::Result<Arc<dyn ChangeSetElement>> {
    match change_set.get(index) {
        Some(element) => Ok(Arc::clone(element)),
        None => bail!(
            "no element at index {} (change set has {})",
            index,
            change_set.len()
        ),
    }
}

fn emit(
    events: &[ChangeSetEvent],
    options: &ReplayOptions,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    let lines = events
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;

    for line in &lines {
        writeln!(out, "{}", line)?;
    }

    if let Some(path) = &options.events_log {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events log {}", path.display()))?;
        for line in &lines {
            writeln!(file, "{}", line)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_keeps_events_after_buffer_poisoned() {
        let mut change_set = ChangeSet::new("poisoned", Vec::new());
        let recorder = Recorder::attach(&change_set);

        let buffer = Arc::clone(&recorder.buffer);
        let _ = std::thread::spawn(move || {
            let _guard = buffer.lock().unwrap();
            panic!("listener thread died holding the buffer");
        })
        .join();
        assert!(recorder.buffer.is_poisoned());

        change_set.add_elements(Vec::new()).unwrap();
        change_set.remove_elements(&[]).unwrap();

        assert_eq!(recorder.drain().len(), 2);
        assert!(recorder.drain().is_empty());
    }
}
