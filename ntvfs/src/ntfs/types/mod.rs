// SPDX-License-Identifier: MIT
mod boot;
mod flags;

pub use boot::*;
pub use flags::*;
