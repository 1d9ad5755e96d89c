// Copyright (c) 2024 Botho Foundation

//! Node-level error types.

use crate::config::ConfigError;
use das_coding::CodingError;
use das_gossip::GossipError;
use displaydoc::Display;
use thiserror::Error;

/// Errors surfaced by the public node API.
///
/// Only configuration and transport-bind failures are fatal; everything
/// else is handled inside the event loop by logging and retrying on a later
/// slot.
#[derive(Debug, Display, Error)]
pub enum NodeError {
    /// invalid configuration: {0}
    Config(#[from] ConfigError),

    /// transport initialization failed: {0}
    Transport(#[from] GossipError),

    /// encoding failure: {0}
    Encoding(#[from] CodingError),

    /// node has not been started
    NotStarted,

    /// node is already running
    AlreadyStarted,
}

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;
