//! Hash command handlers.

use kite_core::strings::{parse_i64, parse_u64};
use kite_core::{LogType, Result};
use kite_net::{Link, Request, Response};

use crate::serv::DbServer;

pub fn proc_hget(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let value = serv
        .store
        .hget(req.rec(1).unwrap_or(b""), req.rec(2).unwrap_or(b""))?;
    resp.reply_get(value);
    Ok(())
}

pub fn proc_hset(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let ret = serv.store.hset(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        req.rec(3).unwrap_or(b""),
        LogType::Sync,
    )?;
    resp.reply_int(ret.as_i64());
    Ok(())
}

pub fn proc_hdel(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let existed = serv.store.hdel(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        LogType::Sync,
    )?;
    resp.reply_int(existed as i64);
    Ok(())
}

pub fn proc_hincr(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    hincr_by(serv, link, req, resp, 1)
}

pub fn proc_hdecr(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    hincr_by(serv, link, req, resp, -1)
}

fn hincr_by(
    serv: &DbServer,
    _link: &mut Link,
    req: &Request,
    resp: &mut Response,
    sign: i64,
) -> Result<()> {
    check_params!(req, resp, 3);
    let by = match req.rec(3) {
        None => 1,
        Some(raw) => match parse_i64(raw) {
            None => {
                resp.client_error("invalid increment");
                return Ok(());
            }
            Some(v) => v,
        },
    };
    let new_val = serv.store.hincr(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        sign.saturating_mul(by),
        LogType::Sync,
    )?;
    // a field that does not parse is left untouched and reads back as 0
    resp.reply_int(new_val.unwrap_or(0));
    Ok(())
}

pub fn proc_hsize(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let size = serv.store.hsize(req.rec(1).unwrap_or(b""))?;
    resp.reply_int(size);
    Ok(())
}

pub fn proc_hexists(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let found = serv
        .store
        .hget(req.rec(1).unwrap_or(b""), req.rec(2).unwrap_or(b""))?
        .is_some();
    resp.reply_int(found as i64);
    Ok(())
}

pub fn proc_hclear(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let n = serv.store.hclear(req.rec(1).unwrap_or(b""), LogType::Sync)?;
    resp.reply_int(n as i64);
    Ok(())
}

pub fn proc_hgetall(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let it = serv
        .store
        .hscan(req.rec(1).unwrap_or(b""), b"", b"", u64::MAX);
    resp.ok();
    for (field, value) in it {
        resp.push(field);
        resp.push(value);
    }
    Ok(())
}

fn scan_limit(req: &Request, i: usize) -> u64 {
    req.rec(i).and_then(parse_u64).unwrap_or(u64::MAX)
}

pub fn proc_hscan(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 5);
    let it = serv.store.hscan(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        req.rec(3).unwrap_or(b""),
        scan_limit(req, 4),
    );
    resp.ok();
    for (field, value) in it {
        resp.push(field);
        resp.push(value);
    }
    Ok(())
}

pub fn proc_hrscan(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 5);
    let it = serv.store.hrscan(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        req.rec(3).unwrap_or(b""),
        scan_limit(req, 4),
    );
    resp.ok();
    for (field, value) in it {
        resp.push(field);
        resp.push(value);
    }
    Ok(())
}

pub fn proc_hkeys(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 5);
    let it = serv.store.hkeys(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        req.rec(3).unwrap_or(b""),
        scan_limit(req, 4),
    );
    resp.ok();
    for (field, _) in it {
        resp.push(field);
    }
    Ok(())
}

pub fn proc_hlist(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let names = serv.store.hlist(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        scan_limit(req, 3),
    )?;
    resp.reply_list(names);
    Ok(())
}

pub fn proc_hrlist(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let names = serv.store.hrlist(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        scan_limit(req, 3),
    )?;
    resp.reply_list(names);
    Ok(())
}

pub fn proc_multi_hset(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    if (req.len() - 2) % 2 != 0 {
        resp.client_error("wrong number of arguments");
        return Ok(());
    }
    let name = req.rec(1).unwrap_or(b"").to_vec();
    let mut count = 0i64;
    for pair in req.records_from(2).chunks(2) {
        serv.store
            .hset(&name, &pair[0], &pair[1], LogType::Sync)?;
        count += 1;
    }
    resp.reply_int(count);
    Ok(())
}

pub fn proc_multi_hget(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let name = req.rec(1).unwrap_or(b"");
    resp.ok();
    for field in req.records_from(2) {
        if let Some(value) = serv.store.hget(name, field)? {
            resp.push(field.clone());
            resp.push(value);
        }
    }
    Ok(())
}

pub fn proc_multi_hdel(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let name = req.rec(1).unwrap_or(b"").to_vec();
    let mut count = 0i64;
    for field in req.records_from(2) {
        if serv.store.hdel(&name, field, LogType::Sync)? {
            count += 1;
        }
    }
    resp.reply_int(count);
    Ok(())
}
