//! Named-service injection.
//!
//! The core subsystems in this workspace consume several external
//! collaborators — the scheduler, the VFS, IDT/IOAPIC programming — without
//! linking against their implementations. Each collaborator is a function
//! pointer registered once at boot and retrieved through a typed getter.
//! [`define_service!`] builds the boilerplate for one such group: a struct
//! of named function pointers, a one-shot [`crate::once_lock::OnceLock`]
//! holding the registered instance, and a free function per entry that
//! forwards to it.
//!
//! ```ignore
//! crate::define_service! {
//!     platform => PlatformServices {
//!         timer_ticks() -> u64;
//!         console_putc(c: u8);
//!     }
//! }
//! ```
//!
//! expands to a `PlatformServices` struct, a `register(PlatformServices)`
//! function, a `platform() -> &'static PlatformServices` getter, and free
//! functions `timer_ticks()` / `console_putc(c)` that forward through it.

#[macro_export]
macro_rules! define_service {
    ($getter:ident => $struct_name:ident {
        $( $name:ident ( $($arg:ident : $argty:ty),* $(,)? ) $(-> $ret:ty)? ; )*
    }) => {
        #[derive(Clone, Copy)]
        pub struct $struct_name {
            $( pub $name: fn($($argty),*) $(-> $ret)?, )*
        }

        static REGISTRY: $crate::once_lock::OnceLock<$struct_name> = $crate::once_lock::OnceLock::new();

        /// Register the service implementation. Only the first call takes
        /// effect; later calls (e.g. from a second init path) are no-ops.
        pub fn register(services: $struct_name) {
            REGISTRY.call_once(|| services);
        }

        pub fn is_registered() -> bool {
            REGISTRY.is_completed()
        }

        fn $getter() -> &'static $struct_name {
            REGISTRY
                .get()
                .expect(concat!(stringify!($getter), " services not registered"))
        }

        $(
            #[inline(always)]
            pub fn $name($($arg: $argty),*) $(-> $ret)? {
                ($getter().$name)($($arg),*)
            }
        )*
    };
}
