//! Core of docmove: the change log model, the store lock, reconciliation and
//! the apply loop.
//!
//! Everything here talks to its collaborators through traits
//! ([`store::DocumentStore`], [`source::ChangeSource`],
//! [`executor::ContentApplier`], [`identity::IdentityProvider`]); concrete
//! implementations live in [`crate::plugins`].

pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod identity;
pub mod lock;
pub mod migration;
pub mod model;
pub mod reconcile;
pub mod source;
pub mod store;
pub mod time;
