//! # Request Engine
//!
//! Asynchronous, cancellable operations over heterogeneous storage backends.
//!
//! ## Overview
//!
//! - [`Operation`] / [`OperationHandle`]: the generic cancellable unit of
//!   work with a single-assignment result and a tree of sub-operations
//! - [`CloudProvider`]: authorization state plus the uniform operation API
//!   (list, get, upload, download, create, move, rename, delete)
//! - [`CloudBackend`]: wire-format hooks a storage service implements
//!
//! Every operation resolves to an [`EitherError<T>`]. A request rejected for
//! authorization waits on the provider's funnel, which runs at most one
//! re-authorization at a time, and is retried once.

pub mod backend;
pub mod error;
mod funnel;
pub mod item;
pub mod operation;
pub mod provider;
mod requests;

pub use backend::CloudBackend;
pub use error::{EitherError, Error, OperationError};
pub use item::{FileType, Item, PageData, Range};
pub use operation::{GenericOperation, Operation, OperationHandle, OperationId};
pub use provider::CloudProvider;
