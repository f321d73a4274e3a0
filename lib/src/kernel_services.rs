//! The external collaborators consumed by the core subsystems: scheduler
//! task handles and the wakeup primitive, VFS node creation for device
//! files, and the low-level interrupt routing needed to wire up a periodic
//! timer. None of these are implemented here — they are registered by
//! whatever boots this kernel via [`register`](scheduler::register) /
//! [`register`](platform::register).

use core::fmt;

/// Opaque handle to a schedulable task, as understood by the (out-of-scope)
/// scheduler. Equality is by identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub u64);

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskHandle({})", self.0)
    }
}

/// Failure signal from a named-service call into the VFS/IDT/IOAPIC
/// collaborators. The core subsystems only need to know "it worked" or
/// "it didn't"; richer error reporting belongs to the collaborator itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceError;

pub mod scheduler {
    use super::TaskHandle;

    crate::define_service! {
        scheduler_services => SchedulerServices {
            current_task() -> TaskHandle;
            block_current_task();
            unblock_task(handle: TaskHandle);
        }
    }
}

pub mod platform {
    use super::ServiceError;

    crate::define_service! {
        platform_services => PlatformServices {
            vfs_create_node(path: &'static str, major: u32, minor: u32, mode: u32) -> Result<(), ServiceError>;
            vfs_remove_node(path: &'static str) -> Result<(), ServiceError>;
            idt_alloc_vector() -> u8;
            ioapic_set_irq_redirection(irq_line: u8, vector: u8);
            boot_epoch_seconds() -> u64;
        }
    }
}
