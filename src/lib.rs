// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Patch consistency engine for managed WordPress sites.
//!
//! Sitepatch deploys hand-modified copies of third-party plugin and theme
//! files from a local development copy of a site to its remote target, keeps
//! track of whether each modification is still in place, detects drift on
//! either side, and rolls modifications back from verified backups.
//!
//! # See Also
//!
//! 1. [`patch::PatchManager`]
//! 2. [`status::resolve`]

pub mod checksum;
pub mod config;
pub mod diff;
pub mod inspect;
pub mod lock;
pub mod patch;
pub mod path;
pub mod prompt;
pub mod remote;
pub mod status;
