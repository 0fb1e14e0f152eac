// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

// Shared building blocks
#[macro_use]
pub mod common;

// Volume core
pub mod ntfs;

pub use common::errors::*;
pub use ntfs::prelude::*;
