#![forbid(unsafe_code)]

//! `cryptsetup`-backed [`VolumeCrypto`](volseal_provider::VolumeCrypto) for volseal.

mod command;
mod system;

pub use system::SystemCrypto;
