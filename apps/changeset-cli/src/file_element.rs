// file_element.rs — A change set element backed by a file under a root dir.
//
// Applying writes the proposed content (or deletes the file for `delete`)
// after snapshotting whatever was there, so `revert` can restore it. State
// transitions fire the element's own change notification, which the holding
// change set republishes as a `state` event.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use changeset_core::{
    ChangeKind, ChangeSet, ChangeSetElement, ElementCapabilities, ElementError, ElementState,
    Emitter, Locator,
};

/// What the target path held before `apply`. `None` means it did not exist.
type Snapshot = Option<Vec<u8>>;

pub struct FileElement {
    locator: Locator,
    root: PathBuf,
    name: String,
    kind: ChangeKind,
    content: Option<String>,
    state: Mutex<ElementState>,
    snapshot: Mutex<Option<Snapshot>>,
    on_did_change: Emitter<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FileElement {
    /// Only `fs://workspace/...` locators map onto `root`.
    pub fn new(
        locator: Locator,
        root: impl AsRef<Path>,
        kind: ChangeKind,
        content: Option<String>,
    ) -> Result<Self, ElementError> {
        let relative = locator.workspace_path().ok_or_else(|| {
            ElementError::Failed(format!("{} is not a workspace file locator", locator))
        })?;
        if relative.is_empty() || relative.split('/').any(|segment| segment == "..") {
            return Err(ElementError::Failed(format!(
                "{} does not name a file inside the workspace",
                locator
            )));
        }
        let name = relative.rsplit('/').next().unwrap_or(relative).to_string();

        Ok(Self {
            root: root.as_ref().to_path_buf(),
            name,
            kind,
            content,
            locator,
            state: Mutex::new(ElementState::Pending),
            snapshot: Mutex::new(None),
            on_did_change: Emitter::new(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Absolute path of the file this element changes.
    pub fn target_path(&self) -> PathBuf {
        // new() guarantees a workspace locator.
        let relative = self.locator.workspace_path().unwrap_or_default();
        self.root.join(relative)
    }

    /// Short textual preview of the proposed change.
    pub fn preview(&self) -> String {
        let current = fs::read_to_string(self.target_path()).ok();
        let mut out = format!("--- {}\n+++ {} ({})\n", self.locator, self.locator, self.kind);
        for line in current.as_deref().unwrap_or_default().lines() {
            out.push_str(&format!("-{}\n", line));
        }
        if self.kind != ChangeKind::Delete {
            for line in self.content.as_deref().unwrap_or_default().lines() {
                out.push_str(&format!("+{}\n", line));
            }
        }
        out
    }

    fn set_state(&self, state: ElementState) {
        let changed = {
            let mut current = lock(&self.state);
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            self.on_did_change.fire(&());
        }
    }

    fn io_error(path: &Path, source: std::io::Error) -> ElementError {
        ElementError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn read_snapshot(path: &Path) -> Result<Snapshot, ElementError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(path, e)),
        }
    }

    fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ElementError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::io_error(parent, e))?;
        }
        fs::write(path, bytes).map_err(|e| Self::io_error(path, e))
    }

    fn remove_file(path: &Path) -> Result<(), ElementError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(path, e)),
        }
    }
}

impl ChangeSetElement for FileElement {
    fn locator(&self) -> &Locator {
        &self.locator
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn icon(&self) -> Option<&str> {
        Some("file")
    }

    fn state(&self) -> Option<ElementState> {
        Some(*lock(&self.state))
    }

    fn change_kind(&self) -> Option<ChangeKind> {
        Some(self.kind)
    }

    fn capabilities(&self) -> ElementCapabilities {
        ElementCapabilities {
            open: true,
            open_change: true,
            apply: true,
            revert: true,
            copy: true,
            dispose: true,
        }
    }

    fn on_did_change(&self) -> Option<&Emitter<()>> {
        Some(&self.on_did_change)
    }

    fn open(&self) -> Result<(), ElementError> {
        let path = self.target_path();
        match fs::read_to_string(&path) {
            Ok(text) => print!("{}", text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                println!("{} does not exist yet", path.display());
            }
            Err(e) => return Err(Self::io_error(&path, e)),
        }
        Ok(())
    }

    fn open_change(&self) -> Result<(), ElementError> {
        print!("{}", self.preview());
        Ok(())
    }

    fn apply(&self) -> Result<(), ElementError> {
        if *lock(&self.state) == ElementState::Applied {
            return Ok(());
        }
        let path = self.target_path();
        let before = Self::read_snapshot(&path)?;

        match self.kind {
            ChangeKind::Delete => Self::remove_file(&path)?,
            ChangeKind::Add | ChangeKind::Modify => {
                let content = self.content.as_deref().unwrap_or_default();
                Self::write_file(&path, content.as_bytes())?;
            }
        }

        *lock(&self.snapshot) = Some(before);
        tracing::debug!(locator = %self.locator, path = %path.display(), "applied file change");
        self.set_state(ElementState::Applied);
        Ok(())
    }

    fn revert(&self) -> Result<(), ElementError> {
        let Some(before) = lock(&self.snapshot).take() else {
            // Nothing applied yet.
            return Ok(());
        };
        let path = self.target_path();
        match before {
            Some(bytes) => Self::write_file(&path, &bytes)?,
            None => Self::remove_file(&path)?,
        }
        tracing::debug!(locator = %self.locator, path = %path.display(), "reverted file change");
        self.set_state(ElementState::Pending);
        Ok(())
    }

    /// The copy starts in the same state but carries no snapshot, so it
    /// cannot revert what the original applied.
    fn copy(&self, _target: &ChangeSet) -> Result<Arc<dyn ChangeSetElement>, ElementError> {
        let copy: Arc<dyn ChangeSetElement> = Arc::new(FileElement {
            locator: self.locator.clone(),
            root: self.root.clone(),
            name: self.name.clone(),
            kind: self.kind,
            content: self.content.clone(),
            state: Mutex::new(*lock(&self.state)),
            snapshot: Mutex::new(None),
            on_did_change: Emitter::new(),
        });
        Ok(copy)
    }

    fn dispose(&self) -> Result<(), ElementError> {
        self.on_did_change.dispose();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn element(root: &Path, uri: &str, kind: ChangeKind, content: Option<&str>) -> FileElement {
        FileElement::new(
            Locator::parse(uri).unwrap(),
            root,
            kind,
            content.map(str::to_string),
        )
        .unwrap()
    }

    #[test]
    fn rejects_non_workspace_locators() {
        let dir = TempDir::new().unwrap();
        let result = FileElement::new(
            Locator::parse("gmail://inbox/msg-1").unwrap(),
            dir.path(),
            ChangeKind::Add,
            None,
        );
        assert!(matches!(result, Err(ElementError::Failed(_))));

        let result = FileElement::new(
            Locator::parse("../escape.txt").unwrap(),
            dir.path(),
            ChangeKind::Add,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn apply_then_revert_new_file() {
        let dir = TempDir::new().unwrap();
        let e = element(dir.path(), "src/new.rs", ChangeKind::Add, Some("fn new() {}\n"));

        e.apply().unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("src/new.rs")).unwrap(),
            "fn new() {}\n"
        );
        assert_eq!(e.state(), Some(ElementState::Applied));

        e.revert().unwrap();
        assert!(!dir.path().join("src/new.rs").exists());
        assert_eq!(e.state(), Some(ElementState::Pending));
    }

    #[test]
    fn modify_and_delete_restore_original_on_revert() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), "original\n").unwrap();

        let modify = element(dir.path(), "README.md", ChangeKind::Modify, Some("changed\n"));
        modify.apply().unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "changed\n"
        );
        modify.revert().unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "original\n"
        );

        let delete = element(dir.path(), "README.md", ChangeKind::Delete, None);
        delete.apply().unwrap();
        assert!(!dir.path().join("README.md").exists());
        delete.revert().unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "original\n"
        );
    }

    #[test]
    fn state_transitions_fire_notifications() {
        let dir = TempDir::new().unwrap();
        let e = element(dir.path(), "a.txt", ChangeKind::Add, Some("a"));
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let _sub = e.on_did_change().unwrap().subscribe(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        e.apply().unwrap();
        e.apply().unwrap();
        e.revert().unwrap();
        e.revert().unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn preview_shows_both_sides() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "old\n").unwrap();
        let e = element(dir.path(), "a.txt", ChangeKind::Modify, Some("new\n"));

        let preview = e.preview();
        assert!(preview.contains("-old"));
        assert!(preview.contains("+new"));
        assert!(preview.contains("(modify)"));
    }

    #[test]
    fn name_defaults_to_file_name() {
        let dir = TempDir::new().unwrap();
        let e = element(dir.path(), "src/deep/lib.rs", ChangeKind::Modify, None);
        assert_eq!(e.name(), Some("lib.rs"));
        assert_eq!(e.target_path(), dir.path().join("src/deep/lib.rs"));
    }
}
