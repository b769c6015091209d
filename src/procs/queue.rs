//! Queue command handlers.

use kite_core::strings::{parse_i64, parse_u64};
use kite_core::{LogType, Result};
use kite_net::{Link, Request, Response};

use crate::serv::DbServer;

pub fn proc_qpush_back(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    qpush(serv, link, req, resp, false)
}

pub fn proc_qpush_front(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    qpush(serv, link, req, resp, true)
}

fn qpush(
    serv: &DbServer,
    _link: &mut Link,
    req: &Request,
    resp: &mut Response,
    front: bool,
) -> Result<()> {
    check_params!(req, resp, 3);
    let name = req.rec(1).unwrap_or(b"").to_vec();
    let mut size = 0;
    for item in req.records_from(2) {
        size = if front {
            serv.store.qpush_front(&name, item, LogType::Sync)?
        } else {
            serv.store.qpush_back(&name, item, LogType::Sync)?
        };
    }
    resp.reply_int(size);
    Ok(())
}

pub fn proc_qpop_front(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let item = serv
        .store
        .qpop_front(req.rec(1).unwrap_or(b""), LogType::Sync)?;
    resp.reply_get(item);
    Ok(())
}

pub fn proc_qpop_back(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let item = serv
        .store
        .qpop_back(req.rec(1).unwrap_or(b""), LogType::Sync)?;
    resp.reply_get(item);
    Ok(())
}

pub fn proc_qfront(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let item = serv.store.qfront(req.rec(1).unwrap_or(b""))?;
    resp.reply_get(item);
    Ok(())
}

pub fn proc_qback(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let item = serv.store.qback(req.rec(1).unwrap_or(b""))?;
    resp.reply_get(item);
    Ok(())
}

pub fn proc_qsize(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let size = serv.store.qsize(req.rec(1).unwrap_or(b""))?;
    resp.reply_int(size);
    Ok(())
}

pub fn proc_qget(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let index = match req.rec(2).and_then(parse_i64) {
        None => {
            resp.client_error("invalid index");
            return Ok(());
        }
        Some(v) => v,
    };
    let item = serv.store.qget(req.rec(1).unwrap_or(b""), index)?;
    resp.reply_get(item);
    Ok(())
}

pub fn proc_qset(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let index = match req.rec(2).and_then(parse_i64) {
        None => {
            resp.client_error("invalid index");
            return Ok(());
        }
        Some(v) => v,
    };
    let updated = serv.store.qset(
        req.rec(1).unwrap_or(b""),
        index,
        req.rec(3).unwrap_or(b""),
        LogType::Sync,
    )?;
    if updated {
        resp.ok();
    } else {
        resp.error("index out of range");
    }
    Ok(())
}

pub fn proc_qslice(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let begin = req.rec(2).and_then(parse_i64).unwrap_or(0);
    let end = req.rec(3).and_then(parse_i64).unwrap_or(-1);
    let items = serv.store.qslice(req.rec(1).unwrap_or(b""), begin, end)?;
    resp.reply_list(items);
    Ok(())
}

fn scan_limit(req: &Request, i: usize) -> u64 {
    req.rec(i).and_then(parse_u64).unwrap_or(u64::MAX)
}

pub fn proc_qlist(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let names = serv.store.qlist(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        scan_limit(req, 3),
    )?;
    resp.reply_list(names);
    Ok(())
}

pub fn proc_qrlist(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let names = serv.store.qrlist(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        scan_limit(req, 3),
    )?;
    resp.reply_list(names);
    Ok(())
}

pub fn proc_qclear(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let n = serv.store.qclear(req.rec(1).unwrap_or(b""), LogType::Sync)?;
    resp.reply_int(n as i64);
    Ok(())
}

pub fn proc_qfix(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    serv.store.qfix(req.rec(1).unwrap_or(b""))?;
    resp.ok();
    Ok(())
}
