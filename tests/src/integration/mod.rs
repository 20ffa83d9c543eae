//! Cross-crate flows: gateway pipeline over the store client.

pub mod support;

mod lifecycle;
mod pipeline;
