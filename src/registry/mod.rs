//! Processor and initializer registration.

pub mod processor_registry;

pub use processor_registry::{ProcessorKey, ProcessorRegistry, RegistryStats};
