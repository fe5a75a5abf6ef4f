#![cfg_attr(not(test), no_std)]

pub mod address;
pub mod env;
pub mod error;

// Réexportations
pub use address::{PhysAddr, VirtAddr};
pub use env::{envx, Env, EnvId, EnvStatus, Upcall, ENVGENSHIFT, LOG2NENV, NENV};
pub use error::{ErrorCode, ExoError, Result};
