use redis::RedisError;

use super::{ClusterError, ErrorKind, Redirect};
use crate::node::split_node_address;

/// Translates an error of the client library into a [`ClusterError`].
///
/// `MOVED` and `ASK` replies become [`ErrorKind::Redirect`] errors carrying the
/// target node, connectivity problems become [`ErrorKind::ConnectionFailure`],
/// and every other reply error is kept as [`ErrorKind::ServerError`] with the
/// original error as its source.
pub fn translate(err: RedisError) -> ClusterError {
    if let Some(redirect) = redirect_of(&err) {
        return ClusterError::from_redirect(redirect, err);
    }

    let kind = match err.kind() {
        redis::ErrorKind::IoError => ErrorKind::ConnectionFailure,
        redis::ErrorKind::TypeError => ErrorKind::UnexpectedResponse,
        redis::ErrorKind::ParseError => ErrorKind::UnexpectedResponse,
        redis::ErrorKind::InvalidClientConfig => ErrorKind::IllegalArgument,
        redis::ErrorKind::ClientError => ErrorKind::InvalidUsage,
        redis::ErrorKind::CrossSlot => ErrorKind::InvalidUsage,
        _ if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() => {
            ErrorKind::ConnectionFailure
        }
        _ => ErrorKind::ServerError,
    };
    ClusterError::from_client(kind, err)
}

fn redirect_of(err: &RedisError) -> Option<Redirect> {
    let (addr, slot) = err.redirect_node()?;
    let (host, port) = split_node_address(addr).ok()?;
    let host = host.into();
    Some(match err.kind() {
        redis::ErrorKind::Ask => Redirect::Ask { slot, host, port },
        _ => Redirect::Moved { slot, host, port },
    })
}
