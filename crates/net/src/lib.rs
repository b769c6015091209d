//! Networking: links, wire framing, dispatch and the event loop.
//!
//! The server runs one readiness-driven event loop thread plus two worker
//! pools (read-heavy and write-heavy commands). A [`Link`] owns its socket
//! and both stream buffers; the event loop owns every link exclusively
//! while it is registered and hands ownership to a worker for the duration
//! of an offloaded command.

pub mod buffer;
pub mod ip_filter;
pub mod link;
pub mod poller;
pub mod proc;
pub mod resp;
pub mod server;
pub mod worker;

pub use buffer::Buffer;
pub use ip_filter::IpFilter;
pub use link::{Link, Request, Response};
pub use proc::{BackendFn, Command, Exec, Handler, ProcFn, ProcMap};
pub use server::{NetworkServer, ServerApp, ServerOptions};
pub use worker::{ProcJob, WorkerPool};
