//! Integration tests for tenant resolution
//!
//! # Test Organization
//!
//! - `request_tenancy`: Stories about HTTP requests picking up their tenant's
//!   context through the middleware
//!
//! - `config_invalidation`: Stories about ConfigMap changes reaching cached
//!   contexts through the watch aggregator
//!
//! - `cluster_schemas`: Schema registration and resource resolution against
//!   a live cluster (ignored by default)

mod cluster_schemas;
mod config_invalidation;
mod helpers;
mod request_tenancy;
