//! Command table and execution policy.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use kite_core::Result;

use crate::link::{Link, Request, Response};

/// Where and how a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exec {
    /// Run on the event loop thread; read-only.
    InlineRead,
    /// Run on the event loop thread; mutating.
    InlineWrite,
    /// Offload to the reader pool.
    ThreadRead,
    /// Offload to the writer pool (serialized writes).
    ThreadWrite,
    /// Take the link over entirely on a dedicated thread.
    Background,
}

impl Exec {
    /// True for the two pool-offloaded policies.
    pub fn is_thread(self) -> bool {
        matches!(self, Exec::ThreadRead | Exec::ThreadWrite)
    }
}

/// Ordinary request handler: may read the link's flags, fills a response.
pub type ProcFn<S> = fn(&S, &mut Link, &Request, &mut Response) -> Result<()>;

/// Backend handler: takes the link over; no response is expected here.
pub type BackendFn<S> = fn(&S, Link, &Request);

/// Handler form, matching the execution policy.
pub enum Handler<S> {
    /// Request/response handler.
    Proc(ProcFn<S>),
    /// Link-consuming handler for [`Exec::Background`].
    Backend(BackendFn<S>),
}

/// A registered command.
pub struct Command<S> {
    /// Command name as it appears on the wire.
    pub name: String,
    /// Execution policy.
    pub exec: Exec,
    /// The handler.
    pub handler: Handler<S>,
    /// Invocation counter for `info`.
    pub calls: AtomicU64,
}

/// Name → command table.
pub struct ProcMap<S> {
    map: HashMap<Vec<u8>, Arc<Command<S>>>,
}

impl<S> ProcMap<S> {
    /// Empty table.
    pub fn new() -> ProcMap<S> {
        ProcMap {
            map: HashMap::new(),
        }
    }

    /// Register a request/response handler.
    pub fn set_proc(&mut self, name: &str, exec: Exec, f: ProcFn<S>) {
        debug_assert!(!matches!(exec, Exec::Background));
        self.map.insert(
            name.as_bytes().to_vec(),
            Arc::new(Command {
                name: name.to_string(),
                exec,
                handler: Handler::Proc(f),
                calls: AtomicU64::new(0),
            }),
        );
    }

    /// Register a link-consuming backend handler.
    pub fn set_backend(&mut self, name: &str, f: BackendFn<S>) {
        self.map.insert(
            name.as_bytes().to_vec(),
            Arc::new(Command {
                name: name.to_string(),
                exec: Exec::Background,
                handler: Handler::Backend(f),
                calls: AtomicU64::new(0),
            }),
        );
    }

    /// Look up a command by wire name.
    pub fn get(&self, name: &[u8]) -> Option<Arc<Command<S>>> {
        self.map.get(name).cloned()
    }

    /// Iterate all registered commands.
    pub fn commands(&self) -> impl Iterator<Item = &Arc<Command<S>>> {
        self.map.values()
    }
}

impl<S> Default for ProcMap<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a request/response handler, mapping errors into the status taxonomy.
pub fn execute<S>(app: &S, cmd: &Command<S>, link: &mut Link, req: &Request) -> Response {
    let mut resp = Response::new();
    match &cmd.handler {
        Handler::Proc(f) => {
            if let Err(e) = f(app, link, req, &mut resp) {
                resp = Response::from_error(&e);
            }
        }
        Handler::Backend(_) => {
            resp.error("backend command dispatched as request");
        }
    }
    resp
}
