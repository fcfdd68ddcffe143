//! Model Context Protocol server exposing curated Kubernetes operations.

pub mod api;
pub mod app;
pub mod authz;
pub mod capability;
pub mod config;
pub mod kube;
pub mod mcp;
pub mod observability;
pub mod registry;
pub mod reload;
pub mod toolsets;
