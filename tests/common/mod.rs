//! Consolidated test utilities for asset-mirror
//!
//! This module provides unified testing utilities for integration tests:
//! local bare remotes driven by the real `git` binary and scratch workspaces
//! holding a config, a cache and output trees.

pub mod assertions;
pub mod fixtures;
pub mod repository;
