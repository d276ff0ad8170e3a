#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use redis::{RedisError, RedisResult, Value};
use redis_cluster_engine::{
    ClusterClient, ClusterCommandExecutor, ClusterConnection, ExecutorConfig,
    FixedTopologyProvider,
};
use redis_cluster_test::{command_args, mock_topology, MockNodeProvider, MockSlotRange};

/// Records the commands mock nodes receive.
#[derive(Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<(u16, Vec<String>)>>>);

impl CommandLog {
    pub fn record(&self, cmd: &[u8], port: u16) -> Vec<String> {
        let args = command_args(cmd);
        self.0.lock().push((port, args.clone()));
        args
    }

    pub fn commands(&self) -> Vec<(u16, Vec<String>)> {
        self.0.lock().clone()
    }

    /// Commands whose name is `name`, with the port that received them.
    pub fn named(&self, name: &str) -> Vec<(u16, Vec<String>)> {
        self.0
            .lock()
            .iter()
            .filter(|(_, args)| args.first().map(String::as_str) == Some(name))
            .cloned()
            .collect()
    }

    /// Sorted ports that received a command named `name`.
    pub fn ports_of(&self, name: &str) -> Vec<u16> {
        let mut ports: Vec<_> = self.named(name).into_iter().map(|(port, _)| port).collect();
        ports.sort_unstable();
        ports
    }
}

pub fn answer(value: Value) -> Result<(), RedisResult<Value>> {
    Err(Ok(value))
}

pub fn fail(err: RedisError) -> Result<(), RedisResult<Value>> {
    Err(Err(err))
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

pub fn bulk(s: &str) -> Value {
    Value::BulkString(s.as_bytes().to_vec())
}

pub fn server_error(detail: &str) -> RedisError {
    RedisError::from((
        redis::ErrorKind::ResponseError,
        "An error was signalled by the server",
        detail.to_string(),
    ))
}

/// An executor over the fixed topology `layout` describes.
pub fn fixed_executor(
    layout: &[MockSlotRange],
    provider: Arc<MockNodeProvider>,
    config: ExecutorConfig,
) -> ClusterCommandExecutor<MockNodeProvider> {
    ClusterCommandExecutor::new(
        Arc::new(FixedTopologyProvider::new(mock_topology(layout))),
        provider,
        config,
    )
    .unwrap()
}

/// A connection over the fixed topology `layout` describes. No topology
/// query is sent, so the provider only sees the commands under test.
pub fn fixed_connection<F>(
    layout: &[MockSlotRange],
    handler: F,
) -> (ClusterConnection<MockNodeProvider>, Arc<MockNodeProvider>)
where
    F: Fn(&[u8], u16) -> Result<(), RedisResult<Value>> + Send + Sync + 'static,
{
    let provider = Arc::new(MockNodeProvider::new(handler));
    let executor = fixed_executor(layout, provider.clone(), ExecutorConfig::default());
    (ClusterConnection::from_executor(executor), provider)
}

/// A connection built the way applications build it, discovering the
/// topology through the node on port 7000.
pub fn discovering_connection(
    provider: Arc<MockNodeProvider>,
) -> ClusterConnection<MockNodeProvider> {
    ClusterClient::new(vec!["redis://127.0.0.1:7000"])
        .unwrap()
        .get_connection_with(provider)
        .unwrap()
}
