// src/sema/mod.rs
//! Semantic analysis: type interning, container resolution, compile-time
//! evaluation, and async frame inference.

pub mod analyzer;
pub mod async_infer;
pub mod comptime;
pub mod container;
pub mod func;
pub mod import;
pub mod layout;
pub mod lazy;
pub mod scope;
pub mod target;
pub mod type_arena;
pub mod value;

pub use analyzer::Analyzer;
pub use container::{ContainerId, ResolveStatus};
pub use func::FnId;
pub use scope::{ScopeId, TldId};
pub use target::Target;
pub use type_arena::{TypeArena, TypeId};
pub use value::Value;
