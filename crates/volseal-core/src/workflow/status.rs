use super::{event, WorkflowLevel, WorkflowReport};
use crate::config::VolsealConfig;
use crate::descriptor::DescriptorStore;
use crate::error::VolsealError;
use crate::lock::{self, LockStatus};

/// Summarise lock ownership, the recorded descriptor, and the completion
/// marker without changing anything on disk.
pub fn status(config: &VolsealConfig) -> WorkflowReport {
    let mut events = Vec::new();
    let lock_dir = config.lock_dir();

    match lock::inspect(&lock_dir) {
        LockStatus::Free => events.push(event(
            WorkflowLevel::Info,
            format!("Lock {} is free", lock_dir.display()),
        )),
        LockStatus::Held(pid) => events.push(event(
            WorkflowLevel::Warn,
            format!("Lock {} held by running process {pid}", lock_dir.display()),
        )),
        LockStatus::Stale(pid) => events.push(event(
            WorkflowLevel::Warn,
            format!(
                "Lock {} is stale (process {pid} is gone); the next run reclaims it",
                lock_dir.display()
            ),
        )),
        LockStatus::Ambiguous => events.push(event(
            WorkflowLevel::Error,
            format!(
                "Lock {} exists without a readable pid; remove it manually once no run is active",
                lock_dir.display()
            ),
        )),
    }

    let store = DescriptorStore::from_config(config);
    let descriptor = match store.load() {
        Ok(descriptor) => {
            events.push(event(
                WorkflowLevel::Success,
                format!(
                    "Descriptor {}: {} -> {} mounted at {} ({}, uuid {})",
                    store.descriptor_path().display(),
                    descriptor.device.display(),
                    descriptor.mapper.display(),
                    descriptor.mountpoint.display(),
                    descriptor.filesystem,
                    descriptor.uuid
                ),
            ));
            Some(descriptor)
        }
        Err(VolsealError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            events.push(event(
                WorkflowLevel::Info,
                format!("No descriptor at {}", store.descriptor_path().display()),
            ));
            None
        }
        Err(err) => {
            events.push(event(WorkflowLevel::Error, err.to_string()));
            None
        }
    };

    if store.is_complete() {
        events.push(event(
            WorkflowLevel::Success,
            format!("Completion marker present at {}", store.success_file().display()),
        ));
    } else {
        events.push(event(
            WorkflowLevel::Info,
            format!("No completion marker at {}", store.success_file().display()),
        ));
    }

    WorkflowReport {
        title: "volseal status".to_string(),
        events,
        descriptor,
    }
}
