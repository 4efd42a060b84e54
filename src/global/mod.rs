//! State that lives outside a single project: default directories and the
//! shared registry cache.

pub mod cache;
pub mod dirs;
