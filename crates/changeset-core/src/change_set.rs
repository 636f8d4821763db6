// change_set.rs — Ordered, identity-keyed collection of pending changes.
//
// A ChangeSet holds at most one element per Locator. Adding an element whose
// locator is already present replaces the old element in place and disposes
// it; new locators are appended. Every mutating call fires exactly one
// aggregate ChangeSetEvent, and each held element's own change notification
// is republished as a `state` event for its locator.
//
// The set owns the lifetime of what it holds: replaced, removed and (on
// dispose) remaining elements are disposed by the set and nobody else. One
// element failing to dispose never stops the others. An element shared with
// a copy is disposed only when the last set holding it lets go.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ChangeSetConfig, InvalidIndexPolicy};
use crate::element::{Capability, ChangeKind, ChangeSetElement, ElementState};
use crate::error::ChangeSetError;
use crate::events::{ChangeSetEvent, Emitter, Subscription};
use crate::locator::Locator;

/// One set's hold on an element. Sets related by `copy` share the claim of
/// every element they share; releasing the last claim disposes the element.
type Claim = Arc<()>;

/// Lifecycle of a change set. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetState {
    Active,
    Disposed,
}

impl fmt::Display for ChangeSetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeSetState::Active => write!(f, "active"),
            ChangeSetState::Disposed => write!(f, "disposed"),
        }
    }
}

/// Serializable point-in-time view of a change set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSetSummary {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub state: ChangeSetState,
    pub elements: Vec<ElementSummary>,
}

/// One row of a [`ChangeSetSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementSummary {
    pub locator: Locator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ElementState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChangeKind>,
}

/// An observable collection of [`ChangeSetElement`]s.
pub struct ChangeSet {
    id: Uuid,
    title: String,
    created_at: DateTime<Utc>,
    config: ChangeSetConfig,
    elements: Vec<Arc<dyn ChangeSetElement>>,
    /// Forwarding subscriptions to each held element's own notification.
    subscriptions: HashMap<Locator, Subscription>,
    claims: HashMap<Locator, Claim>,
    on_did_change: Emitter<ChangeSetEvent>,
    state: ChangeSetState,
}

impl ChangeSet {
    /// Create a change set with default config. Initial elements go through
    /// the same merge path as `add_elements`.
    pub fn new(title: impl Into<String>, elements: Vec<Arc<dyn ChangeSetElement>>) -> Self {
        Self::with_config(title, elements, ChangeSetConfig::default())
    }

    pub fn with_config(
        title: impl Into<String>,
        elements: Vec<Arc<dyn ChangeSetElement>>,
        config: ChangeSetConfig,
    ) -> Self {
        let mut change_set = Self {
            id: Uuid::new_v4(),
            title: title.into(),
            created_at: Utc::now(),
            config,
            elements: Vec::new(),
            subscriptions: HashMap::new(),
            claims: HashMap::new(),
            on_did_change: Emitter::new(),
            state: ChangeSetState::Active,
        };
        change_set.merge(elements);
        change_set
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &ChangeSetConfig {
        &self.config
    }

    pub fn state(&self) -> ChangeSetState {
        self.state
    }

    pub fn is_disposed(&self) -> bool {
        self.state == ChangeSetState::Disposed
    }

    /// Live view of the held elements, in order.
    pub fn elements(&self) -> &[Arc<dyn ChangeSetElement>] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn ChangeSetElement>> {
        self.elements.get(index)
    }

    pub fn position(&self, locator: &Locator) -> Option<usize> {
        self.elements.iter().position(|e| e.locator() == locator)
    }

    pub fn find(&self, locator: &Locator) -> Option<&Arc<dyn ChangeSetElement>> {
        self.position(locator).map(|i| &self.elements[i])
    }

    pub fn contains(&self, locator: &Locator) -> bool {
        self.position(locator).is_some()
    }

    pub fn locators(&self) -> Vec<Locator> {
        self.elements.iter().map(|e| e.locator().clone()).collect()
    }

    /// Positions of elements whose locator matches `pattern`
    /// (see [`Locator::matches`]). Feed the result to `remove_elements`.
    pub fn indices_matching(&self, pattern: &str) -> Vec<usize> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.locator().matches(pattern))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn summary(&self) -> ChangeSetSummary {
        ChangeSetSummary {
            id: self.id,
            title: self.title.clone(),
            created_at: self.created_at,
            state: self.state,
            elements: self
                .elements
                .iter()
                .map(|e| ElementSummary {
                    locator: e.locator().clone(),
                    name: e.name().map(str::to_string),
                    state: e.state(),
                    kind: e.change_kind(),
                })
                .collect(),
        }
    }

    /// Subscribe to the aggregate change stream.
    pub fn on_did_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChangeSetEvent) + Send + Sync + 'static,
    {
        self.on_did_change.subscribe(listener)
    }

    /// Add elements, replacing any held element with the same locator.
    ///
    /// Fires exactly one event carrying every added and modified locator
    /// from this call, even when `elements` is empty.
    pub fn add_elements(
        &mut self,
        elements: Vec<Arc<dyn ChangeSetElement>>,
    ) -> Result<(), ChangeSetError> {
        self.ensure_active()?;
        self.merge(elements);
        Ok(())
    }

    /// Remove the elements at `indices` (positions at call time) and dispose
    /// them. Duplicate indices are collapsed; out-of-range ones follow
    /// [`ChangeSetConfig::invalid_index`].
    pub fn remove_elements(&mut self, indices: &[usize]) -> Result<(), ChangeSetError> {
        self.ensure_active()?;

        let len = self.elements.len();
        let mut targets = indices.to_vec();
        targets.sort_unstable();
        targets.dedup();
        let (valid, invalid): (Vec<usize>, Vec<usize>) =
            targets.into_iter().partition(|&index| index < len);

        if let Some(&index) = invalid.first() {
            match self.config.invalid_index {
                InvalidIndexPolicy::Reject => {
                    return Err(ChangeSetError::IndexOutOfRange { index, len });
                }
                InvalidIndexPolicy::Ignore => {
                    tracing::warn!(
                        changeset_id = %self.id,
                        ?invalid,
                        len,
                        "ignoring out-of-range removal indices"
                    );
                }
            }
        }

        // Highest first so earlier removals never shift later targets.
        let mut removed = Vec::with_capacity(valid.len());
        for &index in valid.iter().rev() {
            let element = self.elements.remove(index);
            drop(self.subscriptions.remove(element.locator()));
            let claim = self.take_claim(element.locator());
            removed.push((element, claim));
        }
        removed.reverse();

        let locators: Vec<Locator> = removed.iter().map(|(e, _)| e.locator().clone()).collect();
        tracing::debug!(changeset_id = %self.id, removed = locators.len(), "removed elements");

        self.release(removed);
        self.on_did_change.fire(&ChangeSetEvent::removed(locators));
        Ok(())
    }

    /// Build a new set with the same title and config but a fresh id.
    ///
    /// Elements that support `copy` are copied into the new set; all others
    /// are shared by reference. A failing copy falls back to sharing. A
    /// shared element stays alive until every set holding it has let go.
    pub fn copy(&self) -> Result<ChangeSet, ChangeSetError> {
        self.ensure_active()?;

        let mut copy = ChangeSet::with_config(self.title.clone(), Vec::new(), self.config.clone());
        for element in &self.elements {
            let next = if element.supports(Capability::Copy) {
                self.copy_element(element, &copy)
            } else {
                Arc::clone(element)
            };
            let shared = same_instance(element, &next);
            copy.add_elements(vec![next])?;
            if shared {
                if let Some(claim) = self.claims.get(element.locator()) {
                    copy.claims.insert(element.locator().clone(), Arc::clone(claim));
                }
            }
        }

        tracing::debug!(
            changeset_id = %self.id,
            copy_id = %copy.id,
            elements = copy.len(),
            "copied change set"
        );
        Ok(copy)
    }

    /// Tear down the event source and dispose every held element.
    ///
    /// After this no further events fire and mutating calls fail with
    /// [`ChangeSetError::Disposed`]. A second call does nothing.
    pub fn dispose(&mut self) {
        if self.is_disposed() {
            tracing::debug!(changeset_id = %self.id, "change set already disposed");
            return;
        }
        self.state = ChangeSetState::Disposed;
        self.on_did_change.dispose();
        self.subscriptions.clear();
        let mut claims = std::mem::take(&mut self.claims);
        let held: Vec<_> = self
            .elements
            .iter()
            .map(|element| {
                let claim = claims.remove(element.locator()).unwrap_or_default();
                (Arc::clone(element), claim)
            })
            .collect();
        tracing::debug!(
            changeset_id = %self.id,
            elements = held.len(),
            "disposing change set"
        );
        self.release(held);
    }

    fn ensure_active(&self) -> Result<(), ChangeSetError> {
        if self.is_disposed() {
            return Err(ChangeSetError::Disposed { id: self.id });
        }
        Ok(())
    }

    fn merge(&mut self, incoming: Vec<Arc<dyn ChangeSetElement>>) {
        let mut positions: HashMap<Locator, usize> = self
            .elements
            .iter()
            .enumerate()
            .map(|(i, e)| (e.locator().clone(), i))
            .collect();

        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut reported: HashSet<Locator> = HashSet::new();
        let mut placed: Vec<usize> = Vec::new();
        let mut displaced: Vec<(Arc<dyn ChangeSetElement>, Claim)> = Vec::new();
        let mut stale_subscriptions: Vec<Subscription> = Vec::new();

        for element in incoming {
            let locator = element.locator().clone();
            match positions.get(&locator) {
                Some(&index) => {
                    if reported.insert(locator.clone()) {
                        modified.push(locator.clone());
                    }
                    if let Some(subscription) = self.subscriptions.remove(&locator) {
                        stale_subscriptions.push(subscription);
                    }
                    let old = std::mem::replace(&mut self.elements[index], element);
                    // Re-adding the instance already held must not dispose it.
                    if !same_instance(&old, &self.elements[index]) {
                        let claim = self
                            .claims
                            .insert(locator.clone(), Claim::default())
                            .unwrap_or_default();
                        displaced.push((old, claim));
                    }
                    placed.push(index);
                }
                None => {
                    reported.insert(locator.clone());
                    added.push(locator.clone());
                    self.claims.insert(locator.clone(), Claim::default());
                    positions.insert(locator, self.elements.len());
                    placed.push(self.elements.len());
                    self.elements.push(element);
                }
            }
        }

        placed.sort_unstable();
        placed.dedup();
        for index in placed {
            let element = Arc::clone(&self.elements[index]);
            self.watch(&element);
        }

        drop(stale_subscriptions);
        tracing::debug!(
            changeset_id = %self.id,
            added = added.len(),
            modified = modified.len(),
            "merged elements"
        );
        self.release(displaced);
        self.on_did_change.fire(&ChangeSetEvent::batch(added, modified));
    }

    /// Forward the element's own notifications as `state` events.
    fn watch(&mut self, element: &Arc<dyn ChangeSetElement>) {
        let Some(source) = element.on_did_change() else {
            return;
        };
        let sink = self.on_did_change.downgrade();
        let locator = element.locator().clone();
        let forwarded = locator.clone();
        let subscription = source.subscribe(move |_| {
            sink.fire(&ChangeSetEvent::state(forwarded.clone()));
        });
        self.subscriptions.insert(locator, subscription);
    }

    fn copy_element(
        &self,
        element: &Arc<dyn ChangeSetElement>,
        target: &ChangeSet,
    ) -> Arc<dyn ChangeSetElement> {
        match panic::catch_unwind(AssertUnwindSafe(|| element.copy(target))) {
            Ok(Ok(copied)) => copied,
            Ok(Err(e)) => {
                tracing::warn!(
                    changeset_id = %self.id,
                    locator = %element.locator(),
                    error = %e,
                    "element copy failed; sharing original"
                );
                Arc::clone(element)
            }
            Err(_) => {
                tracing::error!(
                    changeset_id = %self.id,
                    locator = %element.locator(),
                    "element copy panicked; sharing original"
                );
                Arc::clone(element)
            }
        }
    }

    fn take_claim(&mut self, locator: &Locator) -> Claim {
        self.claims.remove(locator).unwrap_or_default()
    }

    /// Let go of each element, disposing those no other set still holds.
    /// Failures are isolated.
    fn release(&self, held: Vec<(Arc<dyn ChangeSetElement>, Claim)>) {
        for (element, claim) in held {
            if Arc::into_inner(claim).is_none() {
                tracing::debug!(
                    changeset_id = %self.id,
                    locator = %element.locator(),
                    "element still held by another change set"
                );
                continue;
            }
            if !element.supports(Capability::Dispose) {
                tracing::debug!(
                    changeset_id = %self.id,
                    locator = %element.locator(),
                    "element does not advertise dispose; skipping"
                );
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| element.dispose())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        changeset_id = %self.id,
                        locator = %element.locator(),
                        error = %e,
                        "element dispose failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        changeset_id = %self.id,
                        locator = %element.locator(),
                        "element dispose panicked"
                    );
                }
            }
        }
    }
}

fn same_instance(a: &Arc<dyn ChangeSetElement>, b: &Arc<dyn ChangeSetElement>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl Drop for ChangeSet {
    fn drop(&mut self) {
        if !self.is_disposed() {
            self.dispose();
        }
    }
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSet")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("state", &self.state)
            .field("elements", &self.elements)
            .finish()
    }
}
