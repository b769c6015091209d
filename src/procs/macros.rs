//! Shared handler guards.

/// Reject a request with fewer than `$n` records.
macro_rules! check_params {
    ($req:expr, $resp:expr, $n:expr) => {
        if $req.len() < $n {
            $resp.client_error("wrong number of arguments");
            return Ok(());
        }
    };
}

/// Reject a KV key outside this node's range, unless the link opted out.
macro_rules! check_kv_range {
    ($serv:expr, $link:expr, $req:expr, $resp:expr, $i:expr) => {
        if !$link.ignore_key_range {
            if let Some(key) = $req.rec($i) {
                if !$serv.in_kv_range(key) {
                    $resp.out_of_range();
                    return Ok(());
                }
            }
        }
    };
}
