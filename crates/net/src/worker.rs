//! Worker pools for offloaded commands.
//!
//! Each pool owns a job queue and a completion queue. Workers run the
//! handler, write the response into the link's output buffer, park the
//! finished job on the completion queue and wake the event loop, which
//! takes the link back.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use mio::Waker;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::link::{Link, Request};
use crate::proc::{execute, Command};

/// A command moved off the event loop, together with its link.
pub struct ProcJob<S> {
    /// The connection, owned by the job while offloaded.
    pub link: Link,
    /// The parsed request.
    pub req: Request,
    /// The command to run.
    pub cmd: Arc<Command<S>>,
}

struct PoolInner<S> {
    jobs: Mutex<VecDeque<ProcJob<S>>>,
    ready: Condvar,
    done: Mutex<VecDeque<ProcJob<S>>>,
    quit: AtomicBool,
    app: Arc<S>,
    waker: Arc<Waker>,
}

/// Fixed pool of named worker threads.
pub struct WorkerPool<S: Send + Sync + 'static> {
    name: String,
    inner: Arc<PoolInner<S>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: Send + Sync + 'static> WorkerPool<S> {
    /// Start `num` workers named `<name>-N`.
    pub fn start(name: &str, num: usize, app: Arc<S>, waker: Arc<Waker>) -> WorkerPool<S> {
        let inner = Arc::new(PoolInner {
            jobs: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            done: Mutex::new(VecDeque::new()),
            quit: AtomicBool::new(false),
            app,
            waker,
        });
        let mut threads = Vec::with_capacity(num);
        for i in 0..num {
            let inner2 = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || worker_loop(&inner2))
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }
        WorkerPool {
            name: name.to_string(),
            inner,
            threads: Mutex::new(threads),
        }
    }

    /// Enqueue a job.
    pub fn push(&self, job: ProcJob<S>) {
        {
            let mut jobs = self.inner.jobs.lock();
            jobs.push_back(job);
        }
        self.inner.ready.notify_one();
    }

    /// Take one finished job, if any.
    pub fn pop_done(&self) -> Option<ProcJob<S>> {
        self.inner.done.lock().pop_front()
    }

    /// Signal workers to exit and join them.
    pub fn stop(&self) {
        self.inner.quit.store(true, Ordering::SeqCst);
        {
            let _jobs = self.inner.jobs.lock();
            self.inner.ready.notify_all();
        }
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
        debug!(pool = %self.name, "worker pool stopped");
    }
}

fn worker_loop<S: Send + Sync + 'static>(inner: &PoolInner<S>) {
    loop {
        let mut job = {
            let mut jobs = inner.jobs.lock();
            loop {
                if let Some(job) = jobs.pop_front() {
                    break job;
                }
                if inner.quit.load(Ordering::SeqCst) {
                    return;
                }
                inner.ready.wait(&mut jobs);
            }
        };

        job.cmd.calls.fetch_add(1, Ordering::Relaxed);
        let resp = execute(inner.app.as_ref(), job.cmd.as_ref(), &mut job.link, &job.req);
        job.link.send_resp(&resp);

        inner.done.lock().push_back(job);
        let _ = inner.waker.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Response;
    use crate::poller::Poller;
    use crate::proc::{Exec, ProcMap};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    struct App;

    fn proc_upper(
        _app: &App,
        _link: &mut Link,
        req: &Request,
        resp: &mut Response,
    ) -> kite_core::Result<()> {
        let mut v = req.rec(1).unwrap_or(b"").to_vec();
        v.make_ascii_uppercase();
        resp.ok();
        resp.push(v);
        Ok(())
    }

    fn test_link() -> (Link, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_side, peer) = listener.accept().unwrap();
        (Link::from_stream(server_side, peer), client)
    }

    #[test]
    fn test_job_roundtrip_through_pool() {
        let mut poller = Poller::new().unwrap();
        let waker = poller.create_waker(9).unwrap();
        let pool: WorkerPool<App> = WorkerPool::start("kite-test", 2, Arc::new(App), waker);

        let mut map: ProcMap<App> = ProcMap::new();
        map.set_proc("upper", Exec::ThreadRead, proc_upper);
        let cmd = map.get(b"upper").unwrap();

        let (link, _client) = test_link();
        pool.push(ProcJob {
            link,
            req: Request::from_records(vec![b"upper".to_vec(), b"abc".to_vec()]),
            cmd,
        });

        // the waker fires once the job completes
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let events = poller.wait(Duration::from_millis(50)).unwrap();
            if events.iter().any(|e| e.token == 9) {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "completion never woke poller");
        }

        let job = pool.pop_done().expect("finished job");
        assert!(!job.link.output.is_empty());
        assert_eq!(job.link.output.as_slice(), b"2\nok\n3\nABC\n\n");
        pool.stop();
    }
}
