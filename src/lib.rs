// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Share editor rule files through GitHub Gist.
//!
//! Rulegist uploads the `.cursor/rules` directory of a project as a single
//! gist, and downloads it back into any other project. Every upload carries a
//! manifest of the uploaded rule files, so a download can restore the exact
//! directory layout, and verify every file it writes.
//!
//! # Rule Sets
//!
//! A __rule set__ is one gist holding flattened copies of every rule file
//! along with the manifest. The gist description serves as the rule set
//! title. Rule sets are created, replaced, listed, downloaded, and deleted as
//! a whole. There is no merging of any kind.
//!
//! # See Also
//!
//! - [`sync::Syncer`]
//! - [`manifest::Manifest`]

pub mod catalog;
pub mod config;
pub mod display;
pub mod manifest;
pub mod path;
pub mod remote;
pub mod store;
pub mod sync;
