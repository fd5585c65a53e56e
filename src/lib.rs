//! EPIC 数据同步
//!
//! 在本地文件系统和 EPIC 对象存储 (`epic://` 路径) 之间同步文件。

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod path;
pub mod scanner;
pub mod session;
pub mod store;
pub mod transfer;

#[cfg(test)]
mod test_support;

pub use client::{DataClient, DataObject, DeleteReport, SyncOptions, SyncReport};
pub use config::ClientConfig;
pub use error::{DataError, Result};
pub use session::{
    CredentialSession, HttpSessionProvider, SessionDetails, SessionProvider, StaticSessionProvider,
};
pub use store::{MemoryStore, ObjectStore, S3Store};
pub use transfer::{Direction, TransferCallback, TransferResult};
