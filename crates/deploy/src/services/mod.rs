//! Operator commands built on top of the deployment components.
//!
//! Each service is in its own submodule with its config and handler. Services with a
//! non-trivial command line keep its builder in a `cmd.rs`.

pub mod custom_deps;
pub mod mosaic;
pub mod place;
pub mod snapshot;
pub mod swarm;
pub mod test_validator;

// Re-export commonly used types
pub use custom_deps::{CustomDeps, CustomDepsOptions, CustomDepsReport};
pub use mosaic::{Mosaic, MosaicConfig};
pub use place::{InitPlaceReport, PlaceConfig, PlaceInitializer};
pub use snapshot::{SnapshotConfig, SnapshotDownloader};
pub use swarm::{Swarm, SwarmConfig, SwarmReport};
pub use test_validator::{
    FreshValidatorConfig, ProgramBinding, SeedPattern, TestValidator, TestValidatorCmdBuilder,
    ValidatorConfig,
};
