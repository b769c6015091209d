//! Cluster administration handlers.

use kite_cluster::{KeyRange, NodeStatus};
use kite_core::strings::parse_u64;
use kite_core::Result;
use kite_net::{Link, Request, Response};

use crate::serv::DbServer;

fn parse_node_id(req: &Request, i: usize, resp: &mut Response) -> Option<u32> {
    match req.rec(i).and_then(parse_u64) {
        Some(v) if v <= u32::MAX as u64 => Some(v as u32),
        _ => {
            resp.client_error("invalid node id");
            None
        }
    }
}

fn utf8_arg(req: &Request, i: usize) -> String {
    String::from_utf8_lossy(req.rec(i).unwrap_or(b"")).to_string()
}

pub fn proc_add_kv_node(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let port = match req.rec(2).and_then(parse_u64) {
        Some(p) if p <= u16::MAX as u64 => p as u16,
        _ => {
            resp.client_error("invalid port");
            return Ok(());
        }
    };
    let id = serv.cluster.add_kv_node(&utf8_arg(req, 1), port)?;
    resp.reply_int(id as i64);
    Ok(())
}

pub fn proc_del_kv_node(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let id = match parse_node_id(req, 1, resp) {
        None => return Ok(()),
        Some(id) => id,
    };
    let removed = serv.cluster.del_kv_node(id)?;
    resp.reply_int(removed as i64);
    Ok(())
}

pub fn proc_kv_node_list(serv: &DbServer, _link: &mut Link, _req: &Request, resp: &mut Response) -> Result<()> {
    resp.ok();
    for node in serv.cluster.node_list() {
        resp.push(node.to_string());
    }
    Ok(())
}

/// Cluster form of `set_kv_range`, dispatched on arity by the server proc.
pub fn proc_cluster_set_kv_range(
    serv: &DbServer,
    _link: &mut Link,
    req: &Request,
    resp: &mut Response,
) -> Result<()> {
    check_params!(req, resp, 4);
    let id = match parse_node_id(req, 1, resp) {
        None => return Ok(()),
        Some(id) => id,
    };
    let range = KeyRange::new(&utf8_arg(req, 2), &utf8_arg(req, 3));
    let found = serv.cluster.set_kv_range(id, range)?;
    resp.reply_int(found as i64);
    Ok(())
}

pub fn proc_set_kv_status(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let id = match parse_node_id(req, 1, resp) {
        None => return Ok(()),
        Some(id) => id,
    };
    let status = match req.rec(2) {
        Some(b"serving") => NodeStatus::Serving,
        Some(b"init") => NodeStatus::Init,
        _ => {
            resp.client_error("invalid status");
            return Ok(());
        }
    };
    let found = serv.cluster.set_kv_status(id, status)?;
    resp.reply_int(found as i64);
    Ok(())
}

/// `hand_off_range <src_id> <dst_id> <split_key>`: moves the tail of the
/// source's range to the destination and persists both sides.
pub fn proc_hand_off_range(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let src = match parse_node_id(req, 1, resp) {
        None => return Ok(()),
        Some(id) => id,
    };
    let dst = match parse_node_id(req, 2, resp) {
        None => return Ok(()),
        Some(id) => id,
    };
    let moved = serv.cluster.hand_off_range(src, dst, &utf8_arg(req, 3))?;
    resp.ok();
    resp.push(moved.begin);
    resp.push(moved.end);
    Ok(())
}
