//! Component dependency graph

pub mod component;
pub mod dag;

pub use component::{validate_name, Component};
pub use dag::{DependencyGraph, NodeId, Wave};
