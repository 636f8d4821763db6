//! # changeset-core
//!
//! Observable, identity-keyed change sets.
//!
//! A [`ChangeSet`] is an ordered collection of pending modifications to
//! resources (files, documents, drafts). Each modification is a
//! [`ChangeSetElement`] identified by a canonical [`Locator`]; adding an
//! element for a locator already present replaces the old one in place.
//! Consumers subscribe to the set's aggregate [`ChangeSetEvent`] stream
//! instead of polling.
//!
//! ## Key components
//!
//! - [`ChangeSet`] — the collection: merge, removal, copy, dispose
//! - [`ChangeSetElement`] — capability contract for one pending change
//! - [`StagedElement`] — in-memory element with a review state
//! - [`Emitter`] / [`Subscription`] — synchronous publish/subscribe channel
//! - [`Locator`] — canonical resource identity with scheme-aware globbing
//! - [`ChangeSetConfig`] — behavior tunables loaded from TOML

pub mod change_set;
pub mod config;
pub mod element;
pub mod error;
pub mod events;
pub mod locator;

pub use change_set::{ChangeSet, ChangeSetState, ChangeSetSummary, ElementSummary};
pub use config::{ChangeSetConfig, InvalidIndexPolicy};
pub use element::{
    Capability, ChangeKind, ChangeSetElement, ElementCapabilities, ElementData, ElementState,
    StagedElement,
};
pub use error::{ChangeSetError, ConfigError, ElementError, LocatorError};
pub use events::{ChangeSetEvent, Emitter, Subscription, WeakEmitter};
pub use locator::Locator;
