//! The unseal driver (§4.7).

pub mod driver;

pub use driver::{unseal, write_secret_erasing};
