//! Server application state: stores, replication, cluster, key range.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use kite_cluster::{Cluster, ClusterStore};
use kite_core::Result;
use kite_net::{Exec, ProcMap, ServerApp};
use kite_repl::{BackendDump, BackendSync, Slave};
use kite_store::Store;

use crate::config::Config;
use crate::procs;

const SERVER_CONF_KEY: &[u8] = b"server.conf";

/// Everything a command handler can reach.
pub struct DbServer {
    /// User data plus binlog.
    pub store: Store,
    /// Checkpoints, cluster nodes, node-local settings.
    pub meta: Store,
    /// Primary-side replication.
    pub backend_sync: BackendSync,
    /// Bulk dump backend.
    pub backend_dump: BackendDump,
    /// Cluster node table.
    pub cluster: Cluster,
    kv_range: RwLock<(Vec<u8>, Vec<u8>)>,
    slaves: Mutex<Vec<Slave>>,
}

impl DbServer {
    /// Wire the stores into a server and start configured replication.
    pub fn new(store: Store, meta: Store, config: &Config) -> Result<DbServer> {
        let kv_range_s = meta
            .hget(SERVER_CONF_KEY, b"kv_range_s")?
            .unwrap_or_default();
        let kv_range_e = meta
            .hget(SERVER_CONF_KEY, b"kv_range_e")?
            .unwrap_or_default();

        let backend_sync = BackendSync::new(store.clone(), config.replication.sync_speed);
        let backend_dump = BackendDump::new(store.clone());
        let cluster = Cluster::open(ClusterStore::new(meta.clone()))?;

        let mut slaves = Vec::new();
        for upstream in &config.replication.slaveof {
            let is_mirror = upstream.kind == "mirror";
            let mut slave = Slave::new(
                store.clone(),
                meta.clone(),
                &upstream.ip,
                upstream.port,
                is_mirror,
            );
            if !upstream.auth.is_empty() {
                slave.set_auth(&upstream.auth);
            }
            info!(
                primary = %format!("{}:{}", upstream.ip, upstream.port),
                mirror = is_mirror,
                "replicating from upstream"
            );
            slave.start();
            slaves.push(slave);
        }

        Ok(DbServer {
            store,
            meta,
            backend_sync,
            backend_dump,
            cluster,
            kv_range: RwLock::new((kv_range_s, kv_range_e)),
            slaves: Mutex::new(slaves),
        })
    }

    /// Register every command this server answers.
    pub fn register(proc_map: &mut ProcMap<DbServer>) {
        use crate::procs::{cluster, hash, kv, queue, server, zset};

        /* KV */
        proc_map.set_proc("get", Exec::ThreadRead, kv::proc_get);
        proc_map.set_proc("getset", Exec::ThreadWrite, kv::proc_getset);
        proc_map.set_proc("exists", Exec::ThreadRead, kv::proc_exists);
        proc_map.set_proc("multi_get", Exec::ThreadRead, kv::proc_multi_get);
        proc_map.set_proc("scan", Exec::ThreadRead, kv::proc_scan);
        proc_map.set_proc("rscan", Exec::ThreadRead, kv::proc_rscan);
        proc_map.set_proc("keys", Exec::ThreadRead, kv::proc_keys);
        proc_map.set_proc("rkeys", Exec::ThreadRead, kv::proc_rkeys);
        proc_map.set_proc("getbit", Exec::ThreadRead, kv::proc_getbit);
        proc_map.set_proc("set", Exec::ThreadWrite, kv::proc_set);
        proc_map.set_proc("setnx", Exec::ThreadWrite, kv::proc_setnx);
        proc_map.set_proc("del", Exec::ThreadWrite, kv::proc_del);
        proc_map.set_proc("incr", Exec::ThreadWrite, kv::proc_incr);
        proc_map.set_proc("decr", Exec::ThreadWrite, kv::proc_decr);
        proc_map.set_proc("multi_set", Exec::ThreadWrite, kv::proc_multi_set);
        proc_map.set_proc("multi_del", Exec::ThreadWrite, kv::proc_multi_del);
        proc_map.set_proc("setbit", Exec::ThreadWrite, kv::proc_setbit);

        /* HASH */
        proc_map.set_proc("hget", Exec::ThreadRead, hash::proc_hget);
        proc_map.set_proc("hsize", Exec::ThreadRead, hash::proc_hsize);
        proc_map.set_proc("hexists", Exec::ThreadRead, hash::proc_hexists);
        proc_map.set_proc("hgetall", Exec::ThreadRead, hash::proc_hgetall);
        proc_map.set_proc("hscan", Exec::ThreadRead, hash::proc_hscan);
        proc_map.set_proc("hrscan", Exec::ThreadRead, hash::proc_hrscan);
        proc_map.set_proc("hkeys", Exec::ThreadRead, hash::proc_hkeys);
        proc_map.set_proc("hlist", Exec::ThreadRead, hash::proc_hlist);
        proc_map.set_proc("hrlist", Exec::ThreadRead, hash::proc_hrlist);
        proc_map.set_proc("multi_hget", Exec::ThreadRead, hash::proc_multi_hget);
        proc_map.set_proc("hset", Exec::ThreadWrite, hash::proc_hset);
        proc_map.set_proc("hdel", Exec::ThreadWrite, hash::proc_hdel);
        proc_map.set_proc("hincr", Exec::ThreadWrite, hash::proc_hincr);
        proc_map.set_proc("hdecr", Exec::ThreadWrite, hash::proc_hdecr);
        proc_map.set_proc("hclear", Exec::ThreadWrite, hash::proc_hclear);
        proc_map.set_proc("multi_hset", Exec::ThreadWrite, hash::proc_multi_hset);
        proc_map.set_proc("multi_hdel", Exec::ThreadWrite, hash::proc_multi_hdel);

        /* ZSET */
        proc_map.set_proc("zget", Exec::ThreadRead, zset::proc_zget);
        proc_map.set_proc("zsize", Exec::ThreadRead, zset::proc_zsize);
        proc_map.set_proc("zexists", Exec::ThreadRead, zset::proc_zexists);
        proc_map.set_proc("zrank", Exec::ThreadRead, zset::proc_zrank);
        proc_map.set_proc("zrrank", Exec::ThreadRead, zset::proc_zrrank);
        proc_map.set_proc("zrange", Exec::ThreadRead, zset::proc_zrange);
        proc_map.set_proc("zrrange", Exec::ThreadRead, zset::proc_zrrange);
        proc_map.set_proc("zscan", Exec::ThreadRead, zset::proc_zscan);
        proc_map.set_proc("zrscan", Exec::ThreadRead, zset::proc_zrscan);
        proc_map.set_proc("zkeys", Exec::ThreadRead, zset::proc_zkeys);
        proc_map.set_proc("zlist", Exec::ThreadRead, zset::proc_zlist);
        proc_map.set_proc("zrlist", Exec::ThreadRead, zset::proc_zrlist);
        proc_map.set_proc("zset", Exec::ThreadWrite, zset::proc_zset);
        proc_map.set_proc("zdel", Exec::ThreadWrite, zset::proc_zdel);
        proc_map.set_proc("zincr", Exec::ThreadWrite, zset::proc_zincr);
        proc_map.set_proc("zdecr", Exec::ThreadWrite, zset::proc_zdecr);
        proc_map.set_proc("zclear", Exec::ThreadWrite, zset::proc_zclear);

        /* QUEUE */
        proc_map.set_proc("qfront", Exec::ThreadRead, queue::proc_qfront);
        proc_map.set_proc("qback", Exec::ThreadRead, queue::proc_qback);
        proc_map.set_proc("qsize", Exec::ThreadRead, queue::proc_qsize);
        proc_map.set_proc("qget", Exec::ThreadRead, queue::proc_qget);
        proc_map.set_proc("qslice", Exec::ThreadRead, queue::proc_qslice);
        proc_map.set_proc("qrange", Exec::ThreadRead, queue::proc_qslice);
        proc_map.set_proc("qlist", Exec::ThreadRead, queue::proc_qlist);
        proc_map.set_proc("qrlist", Exec::ThreadRead, queue::proc_qrlist);
        proc_map.set_proc("qpush", Exec::ThreadWrite, queue::proc_qpush_back);
        proc_map.set_proc("qpush_back", Exec::ThreadWrite, queue::proc_qpush_back);
        proc_map.set_proc("qpush_front", Exec::ThreadWrite, queue::proc_qpush_front);
        proc_map.set_proc("qpop", Exec::ThreadWrite, queue::proc_qpop_front);
        proc_map.set_proc("qpop_front", Exec::ThreadWrite, queue::proc_qpop_front);
        proc_map.set_proc("qpop_back", Exec::ThreadWrite, queue::proc_qpop_back);
        proc_map.set_proc("qset", Exec::ThreadWrite, queue::proc_qset);
        proc_map.set_proc("qclear", Exec::ThreadWrite, queue::proc_qclear);
        proc_map.set_proc("qfix", Exec::ThreadWrite, queue::proc_qfix);

        /* server + cluster */
        proc_map.set_proc("ignore_key_range", Exec::InlineRead, server::proc_ignore_key_range);
        proc_map.set_proc("get_kv_range", Exec::ThreadRead, server::proc_get_kv_range);
        proc_map.set_proc("set_kv_range", Exec::ThreadWrite, server::proc_set_kv_range);
        proc_map.set_proc("add_kv_node", Exec::ThreadWrite, cluster::proc_add_kv_node);
        proc_map.set_proc("del_kv_node", Exec::ThreadWrite, cluster::proc_del_kv_node);
        proc_map.set_proc("kv_node_list", Exec::ThreadRead, cluster::proc_kv_node_list);
        proc_map.set_proc("set_kv_status", Exec::ThreadWrite, cluster::proc_set_kv_status);
        proc_map.set_proc("hand_off_range", Exec::ThreadWrite, cluster::proc_hand_off_range);
        proc_map.set_backend("dump", server::proc_dump);
        proc_map.set_backend("sync140", server::proc_sync140);
    }

    /// True when this node serves `key` (start exclusive, end inclusive).
    pub fn in_kv_range(&self, key: &[u8]) -> bool {
        let range = self.kv_range.read();
        if !range.0.is_empty() && range.0.as_slice() >= key {
            return false;
        }
        if !range.1.is_empty() && range.1.as_slice() < key {
            return false;
        }
        true
    }

    /// The node-local range.
    pub fn get_kv_range(&self) -> (Vec<u8>, Vec<u8>) {
        self.kv_range.read().clone()
    }

    /// Set and persist the node-local range.
    pub fn set_kv_range(&self, start: &[u8], end: &[u8]) -> Result<()> {
        self.meta
            .hset(SERVER_CONF_KEY, b"kv_range_s", start, kite_core::LogType::Sync)?;
        self.meta
            .hset(SERVER_CONF_KEY, b"kv_range_e", end, kite_core::LogType::Sync)?;
        *self.kv_range.write() = (start.to_vec(), end.to_vec());
        Ok(())
    }

    /// Stop replication threads; called on shutdown.
    pub fn stop_slaves(&self) {
        for slave in self.slaves.lock().iter_mut() {
            slave.stop();
        }
    }
}

impl ServerApp for DbServer {
    fn extra_info(&self) -> Vec<(String, String)> {
        let (min_seq, last_seq) = self.store.binlog().stats();
        let range = self.get_kv_range();
        let mut info = vec![
            ("binlog_min_seq".to_string(), min_seq.to_string()),
            ("binlog_last_seq".to_string(), last_seq.to_string()),
            (
                "kv_range".to_string(),
                format!(
                    "\"{}\" - \"{}\"",
                    String::from_utf8_lossy(&range.0),
                    String::from_utf8_lossy(&range.1)
                ),
            ),
            (
                "replicas".to_string(),
                self.backend_sync.stats().len().to_string(),
            ),
        ];
        for slave in self.slaves.lock().iter() {
            let progress = slave.progress();
            info.push((
                format!("slaveof.{}", slave.id()),
                format!(
                    "{} last_seq={} copy={} sync={}",
                    progress.status.name(),
                    progress.last_seq,
                    progress.copy_count,
                    progress.sync_count
                ),
            ));
        }
        info
    }
}
