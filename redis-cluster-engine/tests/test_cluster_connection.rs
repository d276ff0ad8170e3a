mod support;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use assert_matches::assert_matches;
use redis::Value;
use redis_cluster_engine::{
    ClusterClient, ClusterCommandExecutor, ClusterConnection, ClusterResult, ClusterTopology,
    ErrorKind, ExecutorConfig, FixedTopologyProvider, ShutdownOption, SlotRange, SlotState,
    TopologyProvider,
};
use redis_cluster_test::{
    ask, cluster_replicas_reply, connection_refused, contains_slice, mock_node, mock_topology,
    moved, node_id, respond_cluster_nodes, MockNodeProvider, MockSlotRange,
};

use crate::support::*;

fn by_port(
    values: [i64; 3],
) -> impl Fn(&[u8], u16) -> Result<(), redis::RedisResult<Value>> + Send + Sync + 'static {
    move |_: &[u8], port| answer(Value::Int(values[usize::from(port - 7000)]))
}

#[test]
fn test_db_size_sums_all_masters() {
    let (connection, provider) =
        fixed_connection(&MockSlotRange::three_masters_with_replicas(), |_: &[u8], port| {
            match port {
                7000 => answer(Value::Int(5)),
                7001 => answer(Value::Int(7)),
                7002 => answer(Value::Int(3)),
                _ => answer(Value::Int(1000)),
            }
        });

    assert_eq!(connection.db_size().unwrap(), 15);
    let mut ports = provider.acquired_ports();
    ports.sort_unstable();
    assert_eq!(ports, vec![7000, 7001, 7002]);
    assert!(provider.leases_balanced());
}

#[test]
fn test_db_size_skips_unreachable_masters() {
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], port| {
        if port == 7001 {
            return fail(connection_refused());
        }
        answer(Value::Int(4))
    });

    assert_eq!(connection.db_size().unwrap(), 8);
}

#[test]
fn test_db_size_fails_when_every_master_fails() {
    let (connection, _) =
        fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], _| fail(connection_refused()));

    let err = connection.db_size().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ClusterStateFailure);
    assert_eq!(err.node_failures().len(), 3);
    assert!(err
        .node_failures()
        .iter()
        .all(|(_, failure)| failure.kind() == ErrorKind::ConnectionFailure));
}

#[test]
fn test_last_save_is_most_recent_and_strict() {
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), by_port([100, 250, 200]));
    assert_eq!(connection.last_save().unwrap(), 250);

    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], port| {
        if port == 7002 {
            return fail(server_error("ERR busy"));
        }
        answer(Value::Int(100))
    });
    assert_eq!(connection.last_save().unwrap_err().kind(), ErrorKind::ServerError);
}

#[test]
fn test_unsupported_operations_never_reach_a_node() {
    let (connection, provider) =
        fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], _| answer(Value::Okay));

    let unsupported = [
        connection.multi().unwrap_err(),
        connection.exec().unwrap_err(),
        connection.discard().unwrap_err(),
        connection.watch(&["foo"]).unwrap_err(),
        connection.unwatch().unwrap_err(),
        connection.open_pipeline().unwrap_err(),
        connection.close_pipeline().unwrap_err(),
        connection.set_client_name("app").unwrap_err(),
        connection.get_client_name().unwrap_err(),
        connection.replica_of("127.0.0.1", 7000).unwrap_err(),
        connection.replica_of_no_one().unwrap_err(),
        connection.shutdown_with(ShutdownOption::NoSave).unwrap_err(),
        connection.select(1).unwrap_err(),
    ];

    for err in unsupported {
        assert_eq!(err.kind(), ErrorKind::Unsupported, "{err}");
        assert!(err.is_usage_error());
    }
    connection.select(0).unwrap();
    assert_eq!(provider.acquire_count(), 0);
}

#[test]
fn test_cross_slot_store_is_rejected_before_io() {
    let (connection, provider) =
        fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], _| answer(Value::Int(1)));

    let err = connection.zunionstore("foo", &["foo", "bar"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidUsage);

    let err = connection.rename("foo", "bar").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidUsage);

    let err = connection.sunionstore("dest", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidUsage);

    assert_eq!(provider.acquire_count(), 0);
}

#[test]
fn test_same_slot_store_sends_numkeys() {
    let log = CommandLog::default();
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), {
        let log = log.clone();
        move |cmd: &[u8], port| {
            log.record(cmd, port);
            answer(Value::Int(3))
        }
    });

    let stored = connection
        .zunionstore("{user}:dest", &["{user}:a", "{user}:b"])
        .unwrap();
    assert_eq!(stored, 3);
    connection
        .sinterstore("{user}:dest", &["{user}:a", "{user}:b"])
        .unwrap();

    let owner = connection.cluster_get_node_for_key(b"{user}").unwrap().port();
    assert_eq!(
        log.commands(),
        vec![
            (
                owner,
                strings(&["ZUNIONSTORE", "{user}:dest", "2", "{user}:a", "{user}:b"])
            ),
            (
                owner,
                strings(&["SINTERSTORE", "{user}:dest", "{user}:a", "{user}:b"])
            ),
        ]
    );
}

#[test]
fn test_cluster_forget_skips_the_forgotten_node() {
    let log = CommandLog::default();
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters_with_replicas(), {
        let log = log.clone();
        move |cmd: &[u8], port| {
            log.record(cmd, port);
            answer(Value::Okay)
        }
    });

    connection.cluster_forget(&mock_node(7002)).unwrap();

    assert_eq!(log.ports_of("CLUSTER"), vec![7000, 7001]);
    for (_, args) in log.named("CLUSTER") {
        assert_eq!(args, vec!["CLUSTER", "FORGET", node_id(7002).as_str()]);
    }
}

#[test]
fn test_info_and_config_are_namespaced_by_node() {
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), |cmd: &[u8], port| {
        if contains_slice(cmd, b"INFO") {
            let text = format!("# Server\r\nredis_version:7.2.4\r\ntcp_port:{port}\r\n");
            return answer(bulk(&text));
        }
        if contains_slice(cmd, b"CONFIG") {
            return answer(Value::Array(vec![bulk("maxmemory"), bulk("0")]));
        }
        Ok(())
    });

    let info = connection.info().unwrap();
    assert_eq!(info.len(), 6);
    assert_eq!(info["127.0.0.1:7000.redis_version"], "7.2.4");
    assert_eq!(info["127.0.0.1:7002.tcp_port"], "7002");

    let config = connection.get_config("maxmemory").unwrap();
    assert_eq!(config.len(), 3);
    assert_eq!(config["127.0.0.1:7001.maxmemory"], "0");

    let single = connection.info_on(&mock_node(7001)).unwrap();
    assert_eq!(single["tcp_port"], "7001");
}

#[test]
fn test_mget_uses_one_command_within_a_slot() {
    let log = CommandLog::default();
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), {
        let log = log.clone();
        move |cmd: &[u8], port| {
            log.record(cmd, port);
            answer(Value::Array(vec![bulk("1"), Value::Nil]))
        }
    });

    let values: Vec<Option<String>> = connection.mget(&["{a}x", "{a}y"]).unwrap();

    assert_eq!(values, vec![Some("1".to_string()), None]);
    assert_eq!(log.named("MGET").len(), 1);
    assert!(log.named("GET").is_empty());
}

#[test]
fn test_mget_across_slots_keeps_key_order() {
    let (connection, provider) = fixed_connection(&MockSlotRange::three_masters(), |cmd: &[u8], _| {
        let key = redis_cluster_test::command_args(cmd).pop().unwrap_or_default();
        answer(bulk(&format!("value-of-{key}")))
    });

    let values: Vec<String> = connection.mget(&["foo", "bar", "baz"]).unwrap();

    assert_eq!(values, vec!["value-of-foo", "value-of-bar", "value-of-baz"]);
    assert_eq!(provider.acquire_count(), 3);
}

#[test]
fn test_mget_across_slots_fails_on_any_failure() {
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], port| {
        if port == 7002 {
            return fail(server_error("WRONGTYPE"));
        }
        answer(bulk("ok"))
    });

    let err = connection.mget::<_, String>(&["foo", "bar"]).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerError);
}

#[test]
fn test_exists_and_del_route_by_slot() {
    let log = CommandLog::default();
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), {
        let log = log.clone();
        move |cmd: &[u8], port| {
            let args = log.record(cmd, port);
            match args[0].as_str() {
                "EXISTS" if args[1] == "baz" => answer(Value::Int(0)),
                "EXISTS" => answer(Value::Int(1)),
                "DEL" => answer(Value::Int((args.len() - 1) as i64)),
                _ => Ok(()),
            }
        }
    });

    assert_eq!(connection.exists(&["foo", "bar", "baz"]).unwrap(), 2);
    assert_eq!(log.named("EXISTS").len(), 3);

    assert_eq!(connection.del(&["{k}a", "{k}b"]).unwrap(), 2);
    assert_eq!(
        log.named("DEL"),
        vec![(
            connection.cluster_get_node_for_key(b"k").unwrap().port(),
            strings(&["DEL", "{k}a", "{k}b"])
        )]
    );
}

#[test]
fn test_del_across_slots_fails_if_a_shard_is_down() {
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], port| {
        if port == 7002 {
            return fail(connection_refused());
        }
        answer(Value::Int(1))
    });

    // "foo" lives on 7002, "bar" on 7000.
    let err = connection.del(&["foo", "bar"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionFailure);

    assert_eq!(connection.exists(&["foo", "bar"]).unwrap(), 1);
}

#[test]
fn test_keys_is_the_union_of_all_masters() {
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], port| {
        answer(Value::Array(vec![bulk(&format!("key:{port}"))]))
    });

    let mut keys: Vec<String> = connection.keys("key:*").unwrap();
    keys.sort();

    assert_eq!(keys, vec!["key:7000", "key:7001", "key:7002"]);
}

#[test]
fn test_random_key_skips_empty_masters() {
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], port| {
        if port == 7001 {
            return answer(bulk("some-key"));
        }
        answer(Value::Nil)
    });

    assert_eq!(
        connection.random_key::<String>().unwrap(),
        Some("some-key".to_string())
    );
}

#[test]
fn test_random_key_fails_when_no_master_answers() {
    let (connection, _) =
        fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], _| fail(connection_refused()));

    let err = connection.random_key::<String>().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ClusterStateFailure);
    assert_eq!(err.node_failures().len(), 3);
}

#[test]
fn test_node_for_slot() {
    let (connection, provider) =
        fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], _| answer(Value::Okay));

    let node = connection.cluster_get_node_for_slot(6000).unwrap();
    assert_eq!(node.port(), 7001);
    assert_eq!(node.id(), Some(node_id(7001).as_str()));
    assert_eq!(connection.cluster_get_node_for_key(b"foo").unwrap().port(), 7002);
    assert_eq!(connection.cluster_get_slot_for_key(b"foo"), 12182);

    let err = connection.cluster_get_node_for_slot(16384).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalArgument);
    assert_eq!(provider.acquire_count(), 0);
}

#[test]
fn test_master_replica_map() {
    let layout = MockSlotRange::three_masters_with_replicas();
    let (connection, provider) = fixed_connection(&layout.clone(), move |cmd: &[u8], port| {
        if contains_slice(cmd, b"MYID") {
            return answer(bulk(&node_id(port)));
        }
        if contains_slice(cmd, b"REPLICAS") {
            return answer(cluster_replicas_reply(&layout, port));
        }
        Ok(())
    });

    let map = connection.cluster_get_master_replica_map().unwrap();

    assert_eq!(map.len(), 3);
    for (master, replica) in [(7000, 7003), (7001, 7004), (7002, 7005)] {
        let replicas = &map[&mock_node(master)];
        assert_eq!(replicas.len(), 1);
        assert_eq!(replicas[0].port(), replica);
        assert_eq!(replicas[0].master_id(), Some(node_id(master).as_str()));
    }
    assert!(provider.leases_balanced());
}

#[test]
fn test_replicas_are_asked_from_their_master() {
    let layout = MockSlotRange::three_masters_with_replicas();
    let log = CommandLog::default();
    let (connection, _) = fixed_connection(&layout.clone(), {
        let log = log.clone();
        move |cmd: &[u8], port| {
            log.record(cmd, port);
            answer(cluster_replicas_reply(&layout, port))
        }
    });

    let replicas = connection.cluster_get_replicas(&mock_node(7001)).unwrap();

    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].port(), 7004);
    assert!(replicas[0].is_replica());
    assert_eq!(
        log.commands(),
        vec![(
            7001,
            vec!["CLUSTER".to_string(), "REPLICAS".to_string(), node_id(7001)]
        )]
    );
}

#[test]
fn test_slot_administration_arguments() {
    let log = CommandLog::default();
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters_with_replicas(), {
        let log = log.clone();
        move |cmd: &[u8], port| {
            log.record(cmd, port);
            answer(Value::Okay)
        }
    });

    connection
        .cluster_set_slot(&mock_node(7000), 42, &SlotState::Importing(mock_node(7001)))
        .unwrap();
    connection
        .cluster_set_slot(&mock_node(7000), 42, &SlotState::Stable)
        .unwrap();
    connection
        .cluster_add_slots_in_range(&mock_node(7002), &SlotRange::new(1, 3).unwrap())
        .unwrap();
    connection
        .cluster_delete_slots(&mock_node(7002), &[7, 9])
        .unwrap();
    connection
        .cluster_replicate(&mock_node(7000), &mock_node(7003))
        .unwrap();

    let (importing, master) = (node_id(7001), node_id(7000));
    assert_eq!(
        log.commands(),
        vec![
            (7000, strings(&["CLUSTER", "SETSLOT", "42", "IMPORTING", &importing])),
            (7000, strings(&["CLUSTER", "SETSLOT", "42", "STABLE"])),
            (7002, strings(&["CLUSTER", "ADDSLOTS", "1", "2", "3"])),
            (7002, strings(&["CLUSTER", "DELSLOTS", "7", "9"])),
            (7003, strings(&["CLUSTER", "REPLICATE", &master])),
        ]
    );
}

#[test]
fn test_slot_administration_validates_slots() {
    let (connection, provider) =
        fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], _| answer(Value::Okay));

    let err = connection
        .cluster_add_slots(&mock_node(7000), &[1, 16384])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalArgument);

    let err = connection.cluster_add_slots(&mock_node(7000), &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidUsage);

    let err = connection
        .cluster_set_slot(&mock_node(7000), 20000, &SlotState::Stable)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalArgument);

    let err = connection
        .cluster_replicate(&mock_node(9000), &mock_node(7001))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalArgument);

    assert_eq!(provider.acquire_count(), 0);
}

#[test]
fn test_cluster_info_from_any_node() {
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], _| {
        answer(bulk(
            "cluster_state:ok\r\ncluster_slots_assigned:16384\r\ncluster_known_nodes:3\r\ncluster_size:3\r\n",
        ))
    });

    let info = connection.cluster_get_cluster_info().unwrap();

    assert!(info.is_ok());
    assert_eq!(info.slots_assigned(), Some(16384));
    assert_eq!(info.known_nodes(), Some(3));
}

#[test]
fn test_shutdown_ignores_nodes_going_down() {
    let (connection, provider) =
        fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], _| fail(connection_refused()));

    connection.shutdown().unwrap();
    connection.shutdown_on(&mock_node(7000)).unwrap();
    assert_eq!(provider.acquire_count(), 4);

    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], port| {
        if port == 7001 {
            return fail(server_error("ERR Errors trying to SHUTDOWN"));
        }
        fail(connection_refused())
    });
    assert_eq!(connection.shutdown().unwrap_err().kind(), ErrorKind::ServerError);
}

#[test]
fn test_ping_and_time() {
    let (connection, _) = fixed_connection(&MockSlotRange::three_masters(), |cmd: &[u8], _| {
        if contains_slice(cmd, b"PING") {
            return answer(Value::SimpleString("PONG".into()));
        }
        if contains_slice(cmd, b"TIME") {
            return answer(Value::Array(vec![bulk("1700000000"), bulk("500000")]));
        }
        Ok(())
    });

    assert_eq!(connection.ping().unwrap(), "PONG");
    assert_eq!(connection.ping_on(&mock_node(7002)).unwrap(), "PONG");
    assert_eq!(
        connection.time().unwrap(),
        Duration::from_secs(1_700_000_000) + Duration::from_millis(500)
    );
}

#[test]
fn test_get_and_set_through_discovered_topology() {
    let layout = MockSlotRange::three_masters();
    let log = CommandLog::default();
    let provider = Arc::new(MockNodeProvider::new({
        let log = log.clone();
        move |cmd: &[u8], port| {
            respond_cluster_nodes(cmd, &layout)?;
            let args = log.record(cmd, port);
            match args[0].as_str() {
                "SET" => answer(Value::Okay),
                "GET" => answer(bulk("42")),
                _ => Ok(()),
            }
        }
    }));
    let connection = discovering_connection(provider.clone());

    connection.set("foo", 42).unwrap();
    let value: i64 = connection.get("foo").unwrap();

    assert_eq!(value, 42);
    assert_eq!(log.ports_of("SET"), vec![7002]);
    assert_eq!(log.ports_of("GET"), vec![7002]);
    assert!(provider.leases_balanced());
}

#[test]
fn test_moved_refreshes_the_topology() {
    let log = CommandLog::default();
    let provider = Arc::new(MockNodeProvider::new({
        let log = log.clone();
        let layout = MockSlotRange::three_masters();
        move |cmd: &[u8], port| {
            let args = log.record(cmd, port);
            respond_cluster_nodes(cmd, &layout)?;
            match (port, args[0].as_str()) {
                (7002, "GET") => fail(moved(12182, 7001)),
                (7001, "GET") => answer(bulk("moved-value")),
                _ => Ok(()),
            }
        }
    }));
    let connection = ClusterClient::builder(vec!["redis://127.0.0.1:7000"])
        .topology_cache_timeout(Duration::from_secs(60))
        .build()
        .unwrap()
        .get_connection_with(provider)
        .unwrap();

    let value: String = connection.get("foo").unwrap();

    assert_eq!(value, "moved-value");
    assert_eq!(log.named("CLUSTER").len(), 2);
    assert_eq!(log.ports_of("GET"), vec![7001, 7002]);
}

#[test]
fn test_server_errors_are_returned_without_retry() {
    let (connection, provider) = fixed_connection(&MockSlotRange::three_masters(), |_: &[u8], _| {
        fail(server_error("WRONGTYPE Operation against a key holding the wrong kind of value"))
    });

    let err = connection.get::<_, String>("foo").unwrap_err();

    assert_matches!(err.kind(), ErrorKind::ServerError);
    assert!(err.to_string().contains("WRONGTYPE"), "{err}");
    assert_eq!(provider.acquired_ports(), vec![7002]);
}

#[test]
fn test_redirect_to_a_new_node_refreshes_the_topology() {
    let before = MockSlotRange::three_masters();
    let mut after = MockSlotRange::three_masters();
    after[2].slot_range = 10923..=12000;
    after.push(MockSlotRange {
        primary_port: 7003,
        replica_ports: vec![],
        slot_range: 12001..=16383,
    });

    let log = CommandLog::default();
    let fetches = Arc::new(AtomicUsize::new(0));
    let provider = Arc::new(MockNodeProvider::new({
        let log = log.clone();
        move |cmd: &[u8], port| {
            let args = log.record(cmd, port);
            if args[0] == "CLUSTER" {
                let layout = if fetches.fetch_add(1, Ordering::SeqCst) == 0 {
                    &before
                } else {
                    &after
                };
                return respond_cluster_nodes(cmd, layout);
            }
            match (port, args[0].as_str()) {
                (7002, "GET") => fail(ask(12182, 7003)),
                (7003, "ASKING") => answer(Value::Okay),
                (7003, "GET") => answer(bulk("resharded")),
                _ => Ok(()),
            }
        }
    }));
    let connection = ClusterClient::builder(vec!["redis://127.0.0.1:7000"])
        .topology_cache_timeout(Duration::from_secs(60))
        .build()
        .unwrap()
        .get_connection_with(provider.clone())
        .unwrap();

    let value: String = connection.get("foo").unwrap();

    assert_eq!(value, "resharded");
    assert_eq!(log.named("CLUSTER").len(), 2);
    assert_eq!(log.ports_of("GET"), vec![7002, 7003]);
    assert_eq!(log.ports_of("ASKING"), vec![7003]);
    assert!(provider.leases_balanced());
}

struct CountingTopology {
    inner: FixedTopologyProvider,
    reads: AtomicUsize,
}

impl TopologyProvider for CountingTopology {
    fn topology(&self) -> ClusterResult<Arc<ClusterTopology>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.topology()
    }
}

#[test]
fn test_key_commands_read_the_topology_once() {
    let topology = Arc::new(CountingTopology {
        inner: FixedTopologyProvider::new(mock_topology(&MockSlotRange::three_masters())),
        reads: AtomicUsize::new(0),
    });
    let provider = Arc::new(MockNodeProvider::new(|cmd: &[u8], _| {
        if contains_slice(cmd, b"MGET") {
            return answer(Value::Array(vec![bulk("a"), bulk("b")]));
        }
        answer(bulk("value"))
    }));
    let executor =
        ClusterCommandExecutor::new(topology.clone(), provider, ExecutorConfig::default()).unwrap();
    let connection = ClusterConnection::from_executor(executor);

    let _: String = connection.get("foo").unwrap();
    assert_eq!(topology.reads.load(Ordering::SeqCst), 1);

    let _: Vec<String> = connection.mget(&["{k}a", "{k}b"]).unwrap();
    assert_eq!(topology.reads.load(Ordering::SeqCst), 2);
}
