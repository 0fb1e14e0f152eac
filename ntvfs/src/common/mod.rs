// SPDX-License-Identifier: MIT

#[macro_use]
pub mod macros;

pub mod bitmap;
pub mod errors;
pub mod formatter;

pub use bitmap::BitmapOps;
pub use errors::*;
pub use formatter::FsFormatter;
