#![forbid(unsafe_code)]

mod policy;
mod profile;

pub use policy::{LimitFn, LimitPolicy};
pub use profile::{ProfileEntry, TimeProfile};
