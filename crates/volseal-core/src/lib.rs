//! Core building blocks for volseal.
//!
//! Configuration, locking, device inspection, the provisioning state machine,
//! and the descriptor store live here so the CLI only parses arguments and
//! prints reports.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod host;
pub mod inspect;
pub mod lock;
pub mod logging;
pub mod workflow;

pub use config::{ConfigFormat, VolsealConfig};
pub use descriptor::{DescriptorStore, VolumeDescriptor, COMPLETION_MARKER_TEXT};
pub use error::{VolsealError, VolsealResult};
pub use host::SystemHost;
pub use inspect::DeviceState;
pub use lock::{LockStatus, ProcessLock};
pub use workflow::{ProvisioningState, WorkflowLevel, WorkflowReport};
