//! Node-local admin handlers and backend hand-offs.

use kite_core::Result;
use kite_net::{Link, Request, Response};

use crate::serv::DbServer;

/// `dump [start [end [limit]]]`, streamed from a dedicated thread.
pub fn proc_dump(serv: &DbServer, link: Link, req: &Request) {
    serv.backend_dump.proc(link, req);
}

/// `sync140 <last_seq> <last_key> <sync|mirror>`, the replication hand-off.
pub fn proc_sync140(serv: &DbServer, link: Link, req: &Request) {
    serv.backend_sync.proc(link, req);
}

/// Let a migration peer bypass range gating on this link.
pub fn proc_ignore_key_range(
    _serv: &DbServer,
    link: &mut Link,
    _req: &Request,
    resp: &mut Response,
) -> Result<()> {
    link.ignore_key_range = true;
    resp.ok();
    Ok(())
}

pub fn proc_get_kv_range(serv: &DbServer, _link: &mut Link, _req: &Request, resp: &mut Response) -> Result<()> {
    let (start, end) = serv.get_kv_range();
    resp.ok();
    resp.push(start);
    resp.push(end);
    Ok(())
}

/// Node-local form `set_kv_range <start> <end>`; the cluster form with a
/// node id is `set_kv_range <id> <begin> <end>` (one extra record).
pub fn proc_set_kv_range(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    match req.len() {
        3 => {
            serv.set_kv_range(req.rec(1).unwrap_or(b""), req.rec(2).unwrap_or(b""))?;
            resp.ok();
        }
        4 => super::cluster::proc_cluster_set_kv_range(serv, link, req, resp)?,
        _ => resp.client_error("wrong number of arguments"),
    }
    Ok(())
}
