// element.rs — The capability contract for change set elements.
//
// An element is one pending modification to one resource. Only the locator is
// mandatory. Every behavior (open, preview, apply, revert, copy, dispose) is an
// optional capability: the element advertises what it supports through
// `capabilities()`, and callers check before invoking. Unsupported behaviors
// return `ElementError::Unsupported`.
//
// The change set never mutates an element. It only holds, replaces, removes
// and disposes whole elements.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::change_set::ChangeSet;
use crate::error::ElementError;
use crate::events::Emitter;
use crate::locator::Locator;

/// Opaque extension attributes. Never interpreted by the change set.
pub type ElementData = BTreeMap<String, serde_json::Value>;

/// Review state of an element. Informational only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ElementState {
    Pending,
    Applied,
    /// The underlying resource moved on since the change was proposed.
    Stale,
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementState::Pending => write!(f, "pending"),
            ElementState::Applied => write!(f, "applied"),
            ElementState::Stale => write!(f, "stale"),
        }
    }
}

/// What the element does to its resource. Not used by merge logic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Add => write!(f, "add"),
            ChangeKind::Modify => write!(f, "modify"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// One optional element behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Open,
    OpenChange,
    Apply,
    Revert,
    Copy,
    Dispose,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Open => write!(f, "open"),
            Capability::OpenChange => write!(f, "open_change"),
            Capability::Apply => write!(f, "apply"),
            Capability::Revert => write!(f, "revert"),
            Capability::Copy => write!(f, "copy"),
            Capability::Dispose => write!(f, "dispose"),
        }
    }
}

/// Which optional behaviors an element supports.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ElementCapabilities {
    pub open: bool,
    pub open_change: bool,
    pub apply: bool,
    pub revert: bool,
    pub copy: bool,
    pub dispose: bool,
}

impl ElementCapabilities {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Open => self.open,
            Capability::OpenChange => self.open_change,
            Capability::Apply => self.apply,
            Capability::Revert => self.revert,
            Capability::Copy => self.copy,
            Capability::Dispose => self.dispose,
        }
    }
}

/// A unit of pending change held by a [`ChangeSet`].
///
/// Implementors provide `locator()` and override whichever optional
/// behaviors they advertise in `capabilities()`.
pub trait ChangeSetElement: Send + Sync {
    /// The sole identity key of this element.
    fn locator(&self) -> &Locator;

    fn name(&self) -> Option<&str> {
        None
    }

    fn icon(&self) -> Option<&str> {
        None
    }

    fn description(&self) -> Option<&str> {
        None
    }

    fn state(&self) -> Option<ElementState> {
        None
    }

    fn change_kind(&self) -> Option<ChangeKind> {
        None
    }

    fn data(&self) -> ElementData {
        ElementData::new()
    }

    fn capabilities(&self) -> ElementCapabilities {
        ElementCapabilities::default()
    }

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().supports(capability)
    }

    /// Optional self-change notification. A change set holding this element
    /// republishes every firing as a `state` event for its locator.
    fn on_did_change(&self) -> Option<&Emitter<()>> {
        None
    }

    /// Open the resource as it currently is.
    fn open(&self) -> Result<(), ElementError> {
        Err(ElementError::Unsupported(Capability::Open))
    }

    /// Preview the proposed change.
    fn open_change(&self) -> Result<(), ElementError> {
        Err(ElementError::Unsupported(Capability::OpenChange))
    }

    fn apply(&self) -> Result<(), ElementError> {
        Err(ElementError::Unsupported(Capability::Apply))
    }

    fn revert(&self) -> Result<(), ElementError> {
        Err(ElementError::Unsupported(Capability::Revert))
    }

    /// Produce an equivalent element bound to `target`.
    fn copy(&self, _target: &ChangeSet) -> Result<Arc<dyn ChangeSetElement>, ElementError> {
        Err(ElementError::Unsupported(Capability::Copy))
    }

    /// Release resources. Only the holding change set calls this, and only
    /// when `capabilities().dispose` is set; overriding this alone is not
    /// enough.
    fn dispose(&self) -> Result<(), ElementError> {
        Ok(())
    }
}

impl fmt::Debug for dyn ChangeSetElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSetElement")
            .field("locator", &self.locator().as_str())
            .field("state", &self.state())
            .field("kind", &self.change_kind())
            .finish()
    }
}

/// In-memory element carrying metadata and a review state.
///
/// Applying moves it to `Applied`, reverting back to `Pending`; every actual
/// state change fires its own change notification.
pub struct StagedElement {
    locator: Locator,
    name: Option<String>,
    icon: Option<String>,
    description: Option<String>,
    kind: Option<ChangeKind>,
    data: ElementData,
    state: Mutex<ElementState>,
    on_did_change: Emitter<()>,
    disposed: AtomicBool,
}

impl StagedElement {
    pub fn new(locator: Locator) -> Self {
        Self {
            locator,
            name: None,
            icon: None,
            description: None,
            kind: None,
            data: ElementData::new(),
            state: Mutex::new(ElementState::Pending),
            on_did_change: Emitter::new(),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_kind(mut self, kind: ChangeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_state(self, state: ElementState) -> Self {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Wrap in an `Arc` ready for `ChangeSet::add_elements`.
    pub fn into_element(self) -> Arc<dyn ChangeSetElement> {
        Arc::new(self)
    }

    /// Update the state; fires the change notification only if it changed.
    pub fn set_state(&self, state: ElementState) {
        let changed = {
            let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            self.on_did_change.fire(&());
        }
    }

    pub fn disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<(), ElementError> {
        if self.disposed() {
            return Err(ElementError::Failed(format!(
                "element {} has been disposed",
                self.locator
            )));
        }
        Ok(())
    }
}

impl ChangeSetElement for StagedElement {
    fn locator(&self) -> &Locator {
        &self.locator
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn state(&self) -> Option<ElementState> {
        Some(*self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn change_kind(&self) -> Option<ChangeKind> {
        self.kind
    }

    fn data(&self) -> ElementData {
        self.data.clone()
    }

    fn capabilities(&self) -> ElementCapabilities {
        ElementCapabilities {
            apply: true,
            revert: true,
            copy: true,
            dispose: true,
            ..Default::default()
        }
    }

    fn on_did_change(&self) -> Option<&Emitter<()>> {
        Some(&self.on_did_change)
    }

    fn apply(&self) -> Result<(), ElementError> {
        self.ensure_live()?;
        self.set_state(ElementState::Applied);
        Ok(())
    }

    fn revert(&self) -> Result<(), ElementError> {
        self.ensure_live()?;
        self.set_state(ElementState::Pending);
        Ok(())
    }

    fn copy(&self, _target: &ChangeSet) -> Result<Arc<dyn ChangeSetElement>, ElementError> {
        let state = self.state().unwrap_or(ElementState::Pending);
        let copy: Arc<dyn ChangeSetElement> = Arc::new(StagedElement {
            locator: self.locator.clone(),
            name: self.name.clone(),
            icon: self.icon.clone(),
            description: self.description.clone(),
            kind: self.kind,
            data: self.data.clone(),
            state: Mutex::new(state),
            on_did_change: Emitter::new(),
            disposed: AtomicBool::new(false),
        });
        Ok(copy)
    }

    fn dispose(&self) -> Result<(), ElementError> {
        self.disposed.store(true, Ordering::SeqCst);
        self.on_did_change.dispose();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn staged(path: &str) -> StagedElement {
        StagedElement::new(Locator::parse(path).unwrap())
    }

    /// Element with nothing but a locator.
    struct Bare(Locator);

    impl ChangeSetElement for Bare {
        fn locator(&self) -> &Locator {
            &self.0
        }
    }

    #[test]
    fn bare_element_supports_nothing() {
        let bare = Bare(Locator::parse("a.txt").unwrap());
        assert_eq!(bare.capabilities(), ElementCapabilities::default());
        assert!(!bare.supports(Capability::Apply));
        assert!(matches!(
            bare.apply(),
            Err(ElementError::Unsupported(Capability::Apply))
        ));
        assert!(matches!(
            bare.open_change(),
            Err(ElementError::Unsupported(Capability::OpenChange))
        ));
        assert!(bare.dispose().is_ok());
        assert!(bare.on_did_change().is_none());
        assert!(bare.state().is_none());
    }

    #[test]
    fn staged_element_metadata() {
        let element = staged("src/lib.rs")
            .with_name("lib.rs")
            .with_icon("file-code")
            .with_description("export greet()")
            .with_kind(ChangeKind::Modify)
            .with_data("lines", serde_json::json!(12));

        assert_eq!(element.name(), Some("lib.rs"));
        assert_eq!(element.icon(), Some("file-code"));
        assert_eq!(element.description(), Some("export greet()"));
        assert_eq!(element.change_kind(), Some(ChangeKind::Modify));
        assert_eq!(element.state(), Some(ElementState::Pending));
        assert_eq!(element.data()["lines"], 12);
        assert!(element.supports(Capability::Apply));
        assert!(!element.supports(Capability::Open));
    }

    #[test]
    fn apply_and_revert_fire_only_on_real_changes() {
        let element = staged("a.txt");
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let _sub = element
            .on_did_change()
            .unwrap()
            .subscribe(move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            });

        element.apply().unwrap();
        element.apply().unwrap();
        assert_eq!(element.state(), Some(ElementState::Applied));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        element.revert().unwrap();
        assert_eq!(element.state(), Some(ElementState::Pending));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn disposed_element_refuses_apply() {
        let element = staged("a.txt");
        element.dispose().unwrap();
        assert!(element.disposed());
        assert!(element.on_did_change().unwrap().is_disposed());
        assert!(matches!(element.apply(), Err(ElementError::Failed(_))));
    }

    #[test]
    fn enums_display_and_serialize_snake_case() {
        assert_eq!(ElementState::Stale.to_string(), "stale");
        assert_eq!(ChangeKind::Delete.to_string(), "delete");
        assert_eq!(Capability::OpenChange.to_string(), "open_change");
        assert_eq!(
            serde_json::to_string(&ElementState::Applied).unwrap(),
            "\"applied\""
        );
        assert_eq!(
            serde_json::to_string(&Capability::OpenChange).unwrap(),
            "\"open_change\""
        );
    }
}
