//! Sorted-set command handlers.

use kite_core::strings::{parse_i64, parse_u64};
use kite_core::{LogType, Result};
use kite_net::{Link, Request, Response};

use crate::serv::DbServer;

fn parse_score(req: &Request, i: usize, resp: &mut Response) -> Option<i64> {
    match req.rec(i).and_then(parse_i64) {
        None => {
            resp.client_error("invalid score");
            None
        }
        Some(v) => Some(v),
    }
}

/// Empty record = unbounded; otherwise a strict integer.
fn parse_score_bound(req: &Request, i: usize) -> Option<i64> {
    match req.rec(i) {
        None => None,
        Some(b"") => None,
        Some(raw) => parse_i64(raw),
    }
}

pub fn proc_zset(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let score = match parse_score(req, 3, resp) {
        None => return Ok(()),
        Some(s) => s,
    };
    let ret = serv.store.zset(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        score,
        LogType::Sync,
    )?;
    resp.reply_int(ret.as_i64());
    Ok(())
}

pub fn proc_zget(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let score = serv
        .store
        .zget(req.rec(1).unwrap_or(b""), req.rec(2).unwrap_or(b""))?;
    resp.reply_get(score.map(|s| s.to_string().into_bytes()));
    Ok(())
}

pub fn proc_zdel(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let existed = serv.store.zdel(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        LogType::Sync,
    )?;
    resp.reply_int(existed as i64);
    Ok(())
}

pub fn proc_zincr(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    zincr_by(serv, link, req, resp, 1)
}

pub fn proc_zdecr(serv: &DbServer, link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    zincr_by(serv, link, req, resp, -1)
}

fn zincr_by(
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
    let new_score = serv.store.zincr(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        sign.saturating_mul(by),
        LogType::Sync,
    )?;
    resp.reply_int(new_score);
    Ok(())
}

pub fn proc_zsize(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let size = serv.store.zsize(req.rec(1).unwrap_or(b""))?;
    resp.reply_int(size);
    Ok(())
}

pub fn proc_zexists(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let found = serv
        .store
        .zget(req.rec(1).unwrap_or(b""), req.rec(2).unwrap_or(b""))?
        .is_some();
    resp.reply_int(found as i64);
    Ok(())
}

pub fn proc_zrank(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let rank = serv
        .store
        .zrank(req.rec(1).unwrap_or(b""), req.rec(2).unwrap_or(b""))?;
    resp.reply_int(rank.map(|r| r as i64).unwrap_or(-1));
    Ok(())
}

pub fn proc_zrrank(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 3);
    let rank = serv
        .store
        .zrrank(req.rec(1).unwrap_or(b""), req.rec(2).unwrap_or(b""))?;
    resp.reply_int(rank.map(|r| r as i64).unwrap_or(-1));
    Ok(())
}

/// `zrange name offset limit`. A negative limit means "all"; a trailing
/// `withscores` record is tolerated (pairs are always returned).
fn range_args(req: &Request, resp: &mut Response) -> Option<(u64, u64)> {
    let offset = match req.rec(2).and_then(parse_i64) {
        None => {
            resp.client_error("invalid offset");
            return None;
        }
        Some(v) => v.max(0) as u64,
    };
    let limit = match req.rec(3).and_then(parse_i64) {
        None => {
            resp.client_error("invalid limit");
            return None;
        }
        Some(v) if v < 0 => u64::MAX,
        Some(v) => v as u64,
    };
    Some((offset, limit))
}

pub fn proc_zrange(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let (offset, limit) = match range_args(req, resp) {
        None => return Ok(()),
        Some(v) => v,
    };
    let it = serv.store.zrange(req.rec(1).unwrap_or(b""), offset, limit);
    resp.ok();
    for (key, score) in it {
        resp.push(key);
        resp.push_int(score);
    }
    Ok(())
}

pub fn proc_zrrange(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let (offset, limit) = match range_args(req, resp) {
        None => return Ok(()),
        Some(v) => v,
    };
    let it = serv.store.zrrange(req.rec(1).unwrap_or(b""), offset, limit);
    resp.ok();
    for (key, score) in it {
        resp.push(key);
        resp.push_int(score);
    }
    Ok(())
}

fn scan_limit(req: &Request, i: usize) -> u64 {
    req.rec(i).and_then(parse_u64).unwrap_or(u64::MAX)
}

pub fn proc_zscan(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 6);
    let it = serv.store.zscan(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        parse_score_bound(req, 3),
        parse_score_bound(req, 4),
        scan_limit(req, 5),
    )?;
    resp.ok();
    for (key, score) in it {
        resp.push(key);
        resp.push_int(score);
    }
    Ok(())
}

pub fn proc_zrscan(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 6);
    let it = serv.store.zrscan(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        parse_score_bound(req, 3),
        parse_score_bound(req, 4),
        scan_limit(req, 5),
    )?;
    resp.ok();
    for (key, score) in it {
        resp.push(key);
        resp.push_int(score);
    }
    Ok(())
}

pub fn proc_zkeys(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 6);
    let it = serv.store.zscan(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        parse_score_bound(req, 3),
        parse_score_bound(req, 4),
        scan_limit(req, 5),
    )?;
    resp.ok();
    for (key, _) in it {
        resp.push(key);
    }
    Ok(())
}

pub fn proc_zlist(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let names = serv.store.zlist(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        scan_limit(req, 3),
    )?;
    resp.reply_list(names);
    Ok(())
}

pub fn proc_zrlist(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 4);
    let names = serv.store.zrlist(
        req.rec(1).unwrap_or(b""),
        req.rec(2).unwrap_or(b""),
        scan_limit(req, 3),
    )?;
    resp.reply_list(names);
    Ok(())
}

pub fn proc_zclear(serv: &DbServer, _link: &mut Link, req: &Request, resp: &mut Response) -> Result<()> {
    check_params!(req, resp, 2);
    let n = serv.store.zclear(req.rec(1).unwrap_or(b""), LogType::Sync)?;
    resp.reply_int(n as i64);
    Ok(())
}
