//! Covenant Providers
//!
//! The host side of every import a guest can make:
//!
//! - Effect providers behind traits ([`Console`], [`Filesystem`],
//!   [`Network`], [`Database`], [`KvStore`], [`DocStore`], [`Clock`],
//!   [`RandomSource`], [`Crypto`]) with safe default implementations
//! - Runtime intrinsics for text, lists, maps and paths
//! - [`ProviderSet`], which turns a set of providers into the
//!   [`HostFunctionTable`] the capability gate binds imports from
//!
//! Host functions work on decoded [`AbiValue`](covenant_abi::AbiValue)s;
//! moving bytes in and out of guest memory is the gate's job.

pub mod clock;
pub mod console;
pub mod crypto;
pub mod database;
pub mod error;
pub mod filesystem;
pub mod function;
pub mod intrinsics;
pub mod network;
pub mod random;
pub mod set;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use console::{BufferedConsole, Console, ConsoleStream, StdioConsole, TracingConsole};
pub use crypto::{Crypto, DefaultCrypto};
pub use database::{Database, UnavailableDatabase};
pub use error::{HostCallError, HostCallResult};
pub use filesystem::{FileStat, Filesystem, FsAccess, NoFilesystem, ScopedFilesystem};
pub use function::{Args, FunctionKind, HostFunction, HostFunctionTable, HostHandler};
pub use network::{HostPattern, HttpNetwork, HttpRequest, HttpResponse, Network, OfflineNetwork};
pub use random::{OsRandom, RandomSource, SeededRandom};
pub use set::ProviderSet;
pub use storage::{DocStore, KvStore, MemoryDocStore, MemoryKvStore};
