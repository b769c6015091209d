//! Plain key-value command handlers.

use kite_core::limits::MAX_PACKET_SIZE;
use kite_core::strings::{parse_i64, parse_u64};
use kite_core::{LogType, Result};
use kite_net::{Link, Request, Response};

use crate::serv::DbServer;

pub fn proc_get(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    check_kv_range!(serv, link, req, resp, 1);
    let value = serv.store.get(req.rec(1).unwrap_or(b""))?;
    resp.reply_get(value);
    Ok(())
}

pub fn proc_set(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    check_kv_range!(serv, link, req, resp, 1);
    serv.store
        .set(req.rec(1).unwrap_or(b""), req.rec(2).unwrap_or(b""), LogType::Sync)?;
    resp.reply_int(1);
    Ok(())
}

pub fn proc_setnx(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    check_kv_range!(serv, link, req, resp, 1);
    let wrote = serv.store.setnx(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        LogType::Sync,
    )?;
    resp.reply_int(wrote as i64);
    Ok(())
}

pub fn proc_getset(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    check_kv_range!(serv, link, req, resp, 1);
    let old = serv.store.getset(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        LogType::Sync,
    )?;
    resp.reply_get(old);
    Ok(())
}

pub fn proc_del(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    check_kv_range!(serv, link, req, resp, 1);
    serv.store.del(req.rec(1).unwrap_or(b""), LogType::Sync)?;
    resp.reply_int(1);
    Ok(())
}

pub fn proc_exists(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let found = serv.store.get(req.rec(1).unwrap_or(b""))?.is_some();
    resp.reply_int(found as i64);
    Ok(())
}

pub fn proc_incr(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    incr_by(serv, link, req, resp, 1)
}

pub fn proc_decr(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    incr_by(serv, link, req, resp, -1)
}

fn incr_by(
    serv: &DbServer,
    link: &mut Link,
    req: &Request,
    resp: &mut Response,
    sign: i64,
) -> Result<()> {
    check_params!(req, resp, 2);
    check_kv_range!(serv, link, req, resp, 1);
    let by = match req.rec(2) {
        None => 1,
        Some(raw) => match parse_i64(raw) {
            None => {
                resp.client_error("invalid increment");
                return Ok(());
            }
            Some(v) => v,
        },
    };
    let new_val = serv
        .store
        .incr(req.rec(1).unwrap_or(b""), sign.saturating_mul(by), LogType::Sync)?;
    // a value that does not parse is left untouched and reads back as 0
    resp.reply_int(new_val.unwrap_or(0));
    Ok(())
}

pub fn proc_multi_set(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    if (req.len() - 1) % 2 != 0 {
        resp.client_error("wrong number of arguments");
        return Ok(());
    }
    let mut kvs = Vec::new();
    let records = req.records_from(1);
    for pair in records.chunks(2) {
        if !link.ignore_key_range && !serv.in_kv_range(&pair[0]) {
            resp.out_of_range();
            return Ok(());
        }
        kvs.push((pair[0].clone(), pair[1].clone()));
    }
    let n = serv.store.multi_set(&kvs, LogType::Sync)?;
    resp.reply_int(n as i64);
    Ok(())
}

pub fn proc_multi_get(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    resp.ok();
    for key in req.records_from(1) {
        if let Some(value) = serv.store.get(key)? {
            resp.push(key.clone());
            resp.push(value);
        }
    }
    Ok(())
}

pub fn proc_multi_del(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let keys: Vec<Vec<u8>> = req.records_from(1).to_vec();
    for key in &keys {
        if !link.ignore_key_range && !serv.in_kv_range(key) {
            resp.out_of_range();
            return Ok(());
        }
    }
    let n = serv.store.multi_del(&keys, LogType::Sync)?;
    resp.reply_int(n as i64);
    Ok(())
}

fn scan_limit(req: &Request, i: usize) -> u64 {
    req.rec(i).and_then(parse_u64).unwrap_or(u64::MAX)
}

pub fn proc_scan(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let it = serv.store.scan(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        scan_limit(req, 3),
    );
    resp.ok();
    for (key, value) in it {
        resp.push(key);
        resp.push(value);
    }
    Ok(())
}

pub fn proc_rscan(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let it = serv.store.rscan(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        scan_limit(req, 3),
    );
    resp.ok();
    for (key, value) in it {
        resp.push(key);
        resp.push(value);
    }
    Ok(())
}

pub fn proc_keys(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let it = serv.store.keys(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        scan_limit(req, 3),
    );
    resp.ok();
    for (key, _) in it {
        resp.push(key);
    }
    Ok(())
}

pub fn proc_rkeys(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let it = serv.store.rkeys(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        scan_limit(req, 3),
    );
    resp.ok();
    for (key, _) in it {
        resp.push(key);
    }
    Ok(())
}

pub fn proc_setbit(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    check_kv_range!(serv, link, req, resp, 1);
    let offset = match req.rec(2).and_then(parse_u64) {
        None => {
            resp.client_error("invalid bit offset");
            return Ok(());
        }
        Some(v) => v as usize,
    };
    if offset >= MAX_PACKET_SIZE * 8 {
        resp.client_error("bit offset too large");
        return Ok(());
    }
    let on = req.rec(3) == Some(&b"1"[..]);
    let orig = serv
        .store
        .setbit(req.rec(1).unwrap_or(b""), offset, on, LogType::Sync)?;
    resp.reply_int(orig as i64);
    Ok(())
}

pub fn proc_getbit(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let offset = match req.rec(2).and_then(parse_u64) {
        None => {
            resp.client_error("invalid bit offset");
            return Ok(());
        }
        Some(v) => v as usize,
    };
    let bit = serv.store.getbit(req.rec(1).unwrap_or(b""), offset)?;
    resp.reply_int(bit as i64);
    Ok(())
}
