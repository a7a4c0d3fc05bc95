//! CLI command implementations for burnish.
//!
//! Each submodule implements one subcommand. [`polish`] drives the full
//! window → pileup → inference → stitch pipeline and is the reason this tool
//! exists; the [`command`] module holds the shared dispatch trait.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::struct_excessive_bools)]

pub mod command;
pub mod polish;
