//! The network server: accept loop, readiness dispatch, worker hand-off.
//!
//! One thread runs the event loop. Each tick waits for readiness (zero
//! timeout when requests are already buffered), services the listener,
//! worker completions and client sockets, then drains the ready list:
//! parse one request per link and dispatch it inline or onto a pool.
//!
//! The loop owns every [`Link`] exclusively while it is registered.
//! Offloading a command removes the link from the poller and moves it
//! into the job; the completion queue moves it back.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::TcpListener;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::Waker;
use tracing::{debug, error, info, warn};

use kite_core::{Error, Result};

use crate::ip_filter::IpFilter;
use crate::link::{set_keepalive, Link, Request, Response};
use crate::poller::{Poller, Readiness};
use crate::proc::{execute, Exec, Handler, ProcMap};
use crate::worker::{ProcJob, WorkerPool};

const WAKER_TOKEN: usize = usize::MAX - 1;
const WAIT_TIMEOUT: Duration = Duration::from_millis(50);
const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(300);

/// Version string reported by `info`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application hook for the built-in `info` command.
pub trait ServerApp: Send + Sync + 'static {
    /// Extra key/value pairs appended to the `info` reply.
    fn extra_info(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Listener and dispatch configuration.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Bind address.
    pub ip: String,
    /// Bind port (0 picks an ephemeral port).
    pub port: u16,
    /// Reader pool size.
    pub readers: usize,
    /// Writer pool size.
    pub writers: usize,
    /// Require `auth` before anything else when set.
    pub password: Option<String>,
    /// IP prefixes allowed to connect (empty = all).
    pub allow: Vec<String>,
    /// IP prefixes rejected at accept.
    pub deny: Vec<String>,
}

impl Default for ServerOptions {
    fn default() -> ServerOptions {
        ServerOptions {
            ip: "127.0.0.1".to_string(),
            port: 8888,
            readers: 10,
            writers: 1,
            password: None,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }
}

struct LinkEntry {
    link: Link,
    want_in: bool,
    want_out: bool,
    registered: bool,
}

/// The readiness-driven request server.
pub struct NetworkServer<S: ServerApp> {
    listener: TcpListener,
    listener_token: usize,
    poller: Poller,
    links: HashMap<usize, LinkEntry>,
    reader: WorkerPool<S>,
    writer: WorkerPool<S>,
    proc_map: ProcMap<S>,
    app: Arc<S>,
    need_auth: bool,
    password: String,
    ip_filter: IpFilter,
    quit: Arc<AtomicBool>,
    link_count: usize,
}

impl<S: ServerApp> NetworkServer<S> {
    /// Bind the listener and start the worker pools.
    pub fn bind(opts: ServerOptions, app: Arc<S>, proc_map: ProcMap<S>) -> Result<NetworkServer<S>> {
        if let Some(pw) = &opts.password {
            if !pw.is_empty() && (pw.len() < 32 || pw == "very-strong-password") {
                return Err(Error::invalid_input("weak password is not allowed"));
            }
        }
        let listener = TcpListener::bind((opts.ip.as_str(), opts.port))?;
        listener.set_nonblocking(true)?;
        let listener_token = listener.as_raw_fd() as usize;
        info!(addr = %listener.local_addr()?, "server listening");

        let poller = Poller::new()?;
        let waker: Arc<Waker> = poller.create_waker(WAKER_TOKEN)?;
        let reader = WorkerPool::start("kite-reader", opts.readers.max(1), Arc::clone(&app), Arc::clone(&waker));
        let writer = WorkerPool::start("kite-writer", opts.writers.max(1), Arc::clone(&app), Arc::clone(&waker));

        let password = opts.password.clone().unwrap_or_default();
        let need_auth = !password.is_empty();
        if need_auth {
            info!("auth: on");
        } else {
            info!("auth: off");
        }

        Ok(NetworkServer {
            listener,
            listener_token,
            poller,
            links: HashMap::new(),
            reader,
            writer,
            proc_map,
            app,
            need_auth,
            password,
            ip_filter: IpFilter::from_rules(&opts.allow, &opts.deny),
            quit: Arc::new(AtomicBool::new(false)),
            link_count: 0,
        })
    }

    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Flag that stops the loop within one tick when set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.quit)
    }

    /// Run the event loop until the shutdown flag is set.
    pub fn serve(&mut self) -> Result<()> {
        self.poller
            .register(self.listener.as_raw_fd(), self.listener_token, true, false)?;

        let mut ready: Vec<usize> = Vec::new();
        let mut ready_next: Vec<usize> = Vec::new();
        let mut last_report = Instant::now();

        while !self.quit.load(Ordering::SeqCst) {
            if last_report.elapsed() >= STATUS_REPORT_INTERVAL {
                last_report = Instant::now();
                info!(links = self.link_count, "server running");
            }

            mem::swap(&mut ready, &mut ready_next);
            ready_next.clear();

            let timeout = if ready.is_empty() {
                WAIT_TIMEOUT
            } else {
                Duration::ZERO
            };
            let events = self.poller.wait(timeout)?;

            for ev in events {
                if ev.token == self.listener_token {
                    self.accept_new();
                } else if ev.token == WAKER_TOKEN {
                    self.drain_completions(&mut ready);
                } else {
                    self.client_event(ev, &mut ready);
                }
            }

            for token in mem::take(&mut ready) {
                self.handle_ready(token, &mut ready_next);
            }
        }

        info!("server loop exiting");
        self.reader.stop();
        self.writer.stop();
        Ok(())
    }

    fn accept_new(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let ip = addr.ip().to_string();
                    if !self.ip_filter.check_pass(&ip) {
                        debug!(%addr, "connection denied by ip filter");
                        continue;
                    }
                    if stream.set_nonblocking(true).is_err() {
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    set_keepalive(stream.as_raw_fd());
                    let mut link = Link::from_stream(stream, addr);
                    if link.set_nonblocking(true).is_err() {
                        continue;
                    }
                    let token = link.fd() as usize;
                    if let Err(e) = self.poller.register(link.fd(), token, true, false) {
                        warn!("register failed: {}", e);
                        continue;
                    }
                    self.link_count += 1;
                    debug!(%addr, fd = link.fd(), links = self.link_count, "new link");
                    self.links.insert(
                        token,
                        LinkEntry {
                            link,
                            want_in: true,
                            want_out: false,
                            registered: true,
                        },
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn drain_completions(&mut self, ready: &mut Vec<usize>) {
        loop {
            let job = match self.reader.pop_done() {
                Some(job) => job,
                None => match self.writer.pop_done() {
                    Some(job) => job,
                    None => break,
                },
            };
            self.take_link_back(job, ready);
        }
    }

    fn take_link_back(&mut self, job: ProcJob<S>, ready: &mut Vec<usize>) {
        let token = job.link.fd() as usize;
        self.links.insert(
            token,
            LinkEntry {
                link: job.link,
                want_in: false,
                want_out: false,
                registered: false,
            },
        );
        self.proc_result(token, ready);
    }

    fn client_event(&mut self, ev: Readiness, ready: &mut Vec<usize>) {
        let mut rearm = false;
        {
            let entry = match self.links.get_mut(&ev.token) {
                Some(entry) => entry,
                None => return,
            };
            if ev.readable {
                ready.push(ev.token);
                if !entry.link.is_error() {
                    match entry.link.read() {
                        Ok(0) => {
                            debug!(fd = ev.token, "peer closed");
                            entry.link.mark_error();
                        }
                        Ok(_) => {}
                        Err(e) => {
                            debug!(fd = ev.token, "read failed: {}", e);
                            entry.link.mark_error();
                        }
                    }
                }
            }
            if ev.writable && !entry.link.is_error() {
                match entry.link.write() {
                    Ok(_) => {
                        if entry.link.output.is_empty() {
                            entry.want_out = false;
                            rearm = true;
                        }
                    }
                    Err(e) => {
                        debug!(fd = ev.token, "write failed: {}", e);
                        entry.link.mark_error();
                    }
                }
            }
        }
        if rearm {
            self.update_registration(ev.token);
        }
    }

    fn handle_ready(&mut self, token: usize, ready_next: &mut Vec<usize>) {
        enum Next {
            Close,
            Rearm,
            Dispatch(Request),
        }
        let next = {
            let entry = match self.links.get_mut(&token) {
                Some(entry) => entry,
                None => return,
            };
            if entry.link.is_error() {
                Next::Close
            } else {
                match entry.link.recv() {
                    Err(e) => {
                        warn!(fd = token, "request parse failed: {}", e);
                        Next::Close
                    }
                    Ok(None) => {
                        entry.want_in = true;
                        Next::Rearm
                    }
                    Ok(Some(req)) => {
                        entry.link.active_time = Instant::now();
                        Next::Dispatch(req)
                    }
                }
            }
        };
        match next {
            Next::Close => self.close_link(token),
            Next::Rearm => self.update_registration(token),
            Next::Dispatch(req) => self.dispatch(token, req, ready_next),
        }
    }

    fn dispatch(&mut self, token: usize, req: Request, ready_next: &mut Vec<usize>) {
        // auth gates everything except the auth command itself
        if self.need_auth {
            let entry = match self.links.get_mut(&token) {
                Some(e) => e,
                None => return,
            };
            if !entry.link.auth && req.cmd() != b"auth" {
                let mut resp = Response::new();
                resp.push("noauth");
                resp.push("authentication required");
                entry.link.send_resp(&resp);
                self.proc_result(token, ready_next);
                return;
            }
        }

        if self.dispatch_builtin(token, &req, ready_next) {
            return;
        }

        let cmd = match self.proc_map.get(req.cmd()) {
            Some(cmd) => cmd,
            None => {
                let mut resp = Response::new();
                resp.client_error(&format!(
                    "Unknown Command: {}",
                    String::from_utf8_lossy(req.cmd())
                ));
                if let Some(entry) = self.links.get_mut(&token) {
                    entry.link.send_resp(&resp);
                }
                self.proc_result(token, ready_next);
                return;
            }
        };

        match cmd.exec {
            Exec::Background => {
                let entry = match self.links.remove(&token) {
                    Some(e) => e,
                    None => return,
                };
                let _ = self.poller.deregister(entry.link.fd());
                self.link_count -= 1;
                cmd.calls.fetch_add(1, Ordering::Relaxed);
                match &cmd.handler {
                    Handler::Backend(f) => f(&self.app, entry.link, &req),
                    // a mis-registered backend command drops the link
                    Handler::Proc(_) => warn!(cmd = %cmd.name, "backend command lacks handler"),
                }
            }
            Exec::ThreadRead | Exec::ThreadWrite => {
                let entry = match self.links.remove(&token) {
                    Some(e) => e,
                    None => return,
                };
                let _ = self.poller.deregister(entry.link.fd());
                let job = ProcJob {
                    link: entry.link,
                    req,
                    cmd: Arc::clone(&cmd),
                };
                if cmd.exec == Exec::ThreadWrite {
                    self.writer.push(job);
                } else {
                    self.reader.push(job);
                }
            }
            Exec::InlineRead | Exec::InlineWrite => {
                cmd.calls.fetch_add(1, Ordering::Relaxed);
                if let Some(entry) = self.links.get_mut(&token) {
                    let resp = execute(self.app.as_ref(), &cmd, &mut entry.link, &req);
                    entry.link.send_resp(&resp);
                }
                self.proc_result(token, ready_next);
            }
        }
    }

    /// `ping`, `info` and `auth` are served by the loop itself.
    fn dispatch_builtin(&mut self, token: usize, req: &Request, ready_next: &mut Vec<usize>) -> bool {
        let mut resp = Response::new();
        match req.cmd() {
            b"ping" => resp.ok(),
            b"auth" => {
                if req.len() != 2 {
                    resp.client_error("wrong number of arguments");
                } else if !self.need_auth || req.rec(1) == Some(self.password.as_bytes()) {
                    if let Some(entry) = self.links.get_mut(&token) {
                        entry.link.auth = true;
                    }
                    resp.ok();
                    resp.push("1");
                } else {
                    resp.error("invalid password");
                }
            }
            b"info" => {
                resp.ok();
                resp.push("kitedb-server");
                resp.push("version");
                resp.push(SERVER_VERSION);
                resp.push("links");
                resp.push_int(self.link_count as i64);
                let total: u64 = self
                    .proc_map
                    .commands()
                    .map(|c| c.calls.load(Ordering::Relaxed))
                    .sum();
                resp.push("total_calls");
                resp.push_int(total as i64);
                for (k, v) in self.app.extra_info() {
                    resp.push(k);
                    resp.push(v);
                }
            }
            _ => return false,
        }
        if let Some(entry) = self.links.get_mut(&token) {
            entry.link.send_resp(&resp);
        }
        self.proc_result(token, ready_next);
        true
    }

    /// Flush what we can, then re-arm interests from buffer occupancy.
    fn proc_result(&mut self, token: usize, ready_next: &mut Vec<usize>) {
        let alive = {
            let entry = match self.links.get_mut(&token) {
                Some(entry) => entry,
                None => return,
            };
            match entry.link.write() {
                Err(e) => {
                    debug!(fd = token, "write failed: {}", e);
                    false
                }
                Ok(_) => {
                    entry.want_out = !entry.link.output.is_empty();
                    if entry.link.input.is_empty() {
                        entry.want_in = true;
                    } else {
                        entry.want_in = false;
                        ready_next.push(token);
                    }
                    true
                }
            }
        };
        if alive {
            self.update_registration(token);
        } else {
            self.close_link(token);
        }
    }

    fn update_registration(&mut self, token: usize) {
        let entry = match self.links.get_mut(&token) {
            Some(entry) => entry,
            None => return,
        };
        let fd = entry.link.fd();
        let result = if !entry.want_in && !entry.want_out {
            if entry.registered {
                entry.registered = false;
                self.poller.deregister(fd)
            } else {
                Ok(())
            }
        } else if entry.registered {
            self.poller.reregister(fd, token, entry.want_in, entry.want_out)
        } else {
            entry.registered = true;
            self.poller.register(fd, token, entry.want_in, entry.want_out)
        };
        if let Err(e) = result {
            warn!(fd = token, "poller update failed: {}", e);
            self.close_link(token);
        }
    }

    fn close_link(&mut self, token: usize) {
        if let Some(entry) = self.links.remove(&token) {
            if entry.registered {
                let _ = self.poller.deregister(entry.link.fd());
            }
            self.link_count -= 1;
            debug!(fd = token, links = self.link_count, "link closed");
        }
    }
}
