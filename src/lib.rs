//! # hw-submissions
//!
//! Command-line tools for running a programming course on top of student git
//! repositories.
//!
//! The centre of the crate is the submission reconciler: it clones or updates
//! every repository listed in a roster at a given tag or branch, classifies what
//! changed since the previous run, and keeps a CSV ledger with the submission
//! timestamps of every repository. Sibling tools render per-repository feedback
//! from marking spreadsheets.

// =========================================================================
//                  Canonical lints for whole crate
// =========================================================================
// Official docs:
//   https://doc.rust-lang.org/nightly/clippy/lints.html
// Useful app to lookup full details of individual lints:
//   https://rust-lang.github.io/rust-clippy/master/index.html
//
// We set base lints to give the fullest, most pedantic feedback possible.
// Though we prefer that they are just warnings during development so that build-denial
// is only enforced in CI.
//
#![warn(
    // `clippy::all` is already on by default. It implies the following:
    //   clippy::correctness code that is outright wrong or useless
    //   clippy::suspicious code that is most likely wrong or useless
    //   clippy::complexity code that does something simple but in a complex way
    //   clippy::perf code that can be written to run faster
    //   clippy::style code that should be written in a more idiomatic way
    clippy::all,

    // It's always good to write as much documentation as possible
    missing_docs,

    // > clippy::pedantic lints which are rather strict or might have false positives
    clippy::pedantic,

    // > new lints that are still under development"
    // (so "nursery" doesn't mean "Rust newbies")
    clippy::nursery,

    // > The clippy::cargo group gives you suggestions on how to improve your Cargo.toml file.
    // > This might be especially interesting if you want to publish your crate and are not sure
    // > if you have all useful information in your Cargo.toml.
    clippy::cargo
)]
// > The clippy::restriction group will restrict you in some way.
// > If you enable a restriction lint for your crate it is recommended to also fix code that
// > this lint triggers on. However, those lints are really strict by design and you might want
// > to #[allow] them in some special cases, with a comment justifying that.
#![allow(
    clippy::blanket_clippy_restriction_lints,
    reason = "See above explanation."
)]
#![warn(clippy::restriction)]
//
//
// =========================================================================
//   Individually blanket-allow single lints relevant to this whole crate
// =========================================================================
#![allow(clippy::implicit_return, reason = "This is idiomatic Rust")]
#![allow(
    clippy::multiple_crate_versions,
    reason = "Multiple deps are currently pinning `windows-sys`"
)]
#![allow(
    clippy::std_instead_of_alloc,
    reason = "We're not interested in becoming no-std compatible"
)]
#![allow(
    clippy::std_instead_of_core,
    reason = "Import items from std instead of core"
)]
#![allow(
    clippy::mod_module_files,
    reason = "mod.rs is the more conventional layout"
)]
#![allow(
    clippy::missing_inline_in_public_items,
    reason = "The hot path is git and file I/O; explicit inlining would not show up in a profile"
)]
#![allow(
    clippy::exhaustive_structs,
    reason = "Public types are shared with the binary and tests, not published for downstream crates"
)]
#![allow(
    clippy::exhaustive_enums,
    reason = "Outcome and status enums are matched exhaustively on purpose"
)]
#![allow(
    clippy::question_mark_used,
    reason = "We rely on propagating errors with question mark extensively"
)]
#![allow(
    clippy::semicolon_outside_block,
    reason = "Opt in to have semicolon in the outside block across codebase"
)]
#![allow(
    clippy::single_call_fn,
    reason = "Sync and CLI steps are split into small named functions called once"
)]
#![allow(
    clippy::arithmetic_side_effects,
    reason = "Only counters and ordinals bounded by the roster length are incremented"
)]
#![allow(
    clippy::renamed_function_params,
    reason = "Collides with `min_ident_chars` for the single-letter formatter params of `Display` impls"
)]
#![allow(
    clippy::arbitrary_source_item_ordering,
    reason = "Modules read top-down: public types, then operations, then private helpers"
)]

pub mod feedback;
pub mod submissions;
pub mod utils;
