//! Submission reconciliation: bring every working copy listed in a roster in
//! line with a branch or tag, and record the result in the timestamp ledger.

pub mod config;
pub mod context;
pub mod ledger;
pub mod reconcile;
pub mod roster;
pub mod sync;
