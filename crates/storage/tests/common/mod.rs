pub mod mocks;

#[allow(unused_imports)]
pub use mocks::{CountingFactory, seeded_configs};
