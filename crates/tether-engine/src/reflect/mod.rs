//! Type shapes and descriptors
//!
//! Bridged types describe themselves once through [`TypeShape::builder`];
//! [`TypeCache`] turns a shape into the native-readable descriptor table.

mod builder;
pub mod descriptor;
pub mod naming;
mod shape;

pub use builder::ShapeBuilder;
pub use descriptor::{build_descriptor, TypeCache};
pub use naming::{lowered_name, method_signature};
pub use shape::{shape_of, Bridged, FieldShape, Kind, MethodShape, ParamShape, TypeShape};

pub(crate) use shape::{constructor, ConstructFn};
