//! Infrastructure layer - external adapters (database, filesystem, network).
//!
//! This layer handles all I/O operations and external dependencies.

pub mod config;
pub mod http_remote;
pub mod local_storage;
pub mod reachability;

pub use config::{
    config_file_path, ensure_config_exists, load_config, load_config_from_file, save_config,
    save_config_to,
};
pub use http_remote::{HttpRemote, RemoteBackend};
pub use local_storage::{load_entity, save_entity, CachedEntity, DurableStore, LocalStorage};
pub use reachability::{Reachability, StaticReachability, TcpReachability};
