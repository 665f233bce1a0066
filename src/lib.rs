//! Tenant Bridge - Kubernetes-backed schemas, resources and tenant contexts
//!
//! The bridge lets an HTTP application treat Kubernetes as its storage
//! control plane:
//!
//! - custom resource schemas are registered with the API server once per
//!   process and tolerate other replicas racing to create them
//! - resources are addressed by group/kind and resolved through discovery to
//!   a namespace- or cluster-scoped client
//! - each request is bound to its tenant's context, built from a per-tenant
//!   ConfigMap, cached, and invalidated when that ConfigMap changes
//!
//! # Modules
//!
//! - [`schema`] - CRD schemas and the process-wide schema registry
//! - [`resolver`] - Scope-aware resolution of group/kind to resource clients
//! - [`tenant`] - Tenant context building, caching and ConfigMap watches
//! - [`middleware`] - Request middleware attaching tenant contexts
//! - [`server`] - HTTP router and upstream identity handling
//! - [`config`] - Runtime configuration
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod middleware;
pub mod resolver;
pub mod schema;
pub mod server;
pub mod tenant;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Path prefix whose requests receive a tenant context
pub const DEFAULT_API_PREFIX: &str = "/api";

/// Default bind address of the HTTP server
pub const DEFAULT_LISTEN_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 8080);
