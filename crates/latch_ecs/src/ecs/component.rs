// component.rs - Component and tag type declarations
//
// Components are identified by u32 ids handed out by a TypeRegistry, keyed by
// name rather than Rust TypeId, so externally described components (scripts,
// save files) share one id space with Rust-defined ones.

pub type ComponentId = u32;
pub type TagId = u32;
pub type SystemId = u32;

/// Sentinel returned by registry lookups that miss. Real ids start at 1.
pub const INVALID_ID: u32 = 0;

/// Metadata describing a component's memory layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentMeta {
    pub id: ComponentId,
    pub name: String,
    pub size: usize,
    pub align: usize,
}

/// Trait for Rust-defined plain-data components.
///
/// `Pod` guarantees the storage layer may copy the value as raw bytes and
/// view any correctly sized and aligned byte range as `Self`.
pub trait Component: bytemuck::Pod + Send + Sync {
    /// Registry key for this component type.
    const NAME: &'static str;
}

/// Zero-size marker that only affects archetype matching.
pub trait Tag: 'static + Send + Sync {
    const NAME: &'static str;
}

/// Helper macro to implement the `Component` trait.
///
/// # Example
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// struct Position { x: f32, y: f32, z: f32 }
///
/// define_component!(Position, "Position");
/// ```
#[macro_export]
macro_rules! define_component {
    ($ty:ty) => {
        $crate::define_component!($ty, stringify!($ty));
    };
    ($ty:ty, $name:expr) => {
        impl $crate::ecs::Component for $ty {
            const NAME: &'static str = $name;
        }
    };
}

/// Helper macro to implement the `Tag` trait.
#[macro_export]
macro_rules! define_tag {
    ($ty:ty) => {
        $crate::define_tag!($ty, stringify!($ty));
    };
    ($ty:ty, $name:expr) => {
        impl $crate::ecs::Tag for $ty {
            const NAME: &'static str = $name;
        }
    };
}
