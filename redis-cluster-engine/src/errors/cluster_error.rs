use std::{error, fmt};

use arcstr::ArcStr;
use redis::RedisError;

/// An enum of all error kinds.
///
/// Every failure surfaced by this crate carries one of these kinds, regardless
/// of which node or which client call produced it, so callers can handle
/// errors without knowing anything about the underlying client library.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The API was used in a way that cannot work against a cluster, for
    /// example a multi-key command whose keys hash to different slots.
    InvalidUsage,
    /// The operation is not available in cluster mode.
    Unsupported,
    /// An argument was rejected, for example a node that is not part of the cluster.
    IllegalArgument,
    /// The cluster state could not be determined, or is inconsistent.
    ClusterStateFailure,
    /// A node answered with a MOVED or ASK redirection.
    Redirect,
    /// A command was redirected more often than allowed.
    TooManyRedirects,
    /// A multi node command did not complete in time.
    CommandTimeout,
    /// A command task was aborted before it produced a result.
    ExecutionFailure,
    /// The connection to a node failed.
    ConnectionFailure,
    /// A connection could not be obtained from a node's pool.
    ResourceFailure,
    /// A node's response could not be converted to the expected type.
    UnexpectedResponse,
    /// A node answered with an error reply.
    ServerError,
}

/// Where a redirected command should be sent next.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Redirect {
    /// The slot permanently moved to another node.
    Moved {
        /// The redirected slot.
        slot: u16,
        /// Host of the node now serving the slot.
        host: ArcStr,
        /// Port of the node now serving the slot.
        port: u16,
    },
    /// The slot is being migrated, the next request has to be preceded by `ASKING`.
    Ask {
        /// The redirected slot.
        slot: u16,
        /// Host of the node importing the slot.
        host: ArcStr,
        /// Port of the node importing the slot.
        port: u16,
    },
}

impl Redirect {
    /// Returns the `(host, port)` the redirect points to.
    pub fn target(&self) -> (&str, u16) {
        match self {
            Redirect::Moved { host, port, .. } | Redirect::Ask { host, port, .. } => {
                (host.as_str(), *port)
            }
        }
    }

    /// Returns the slot that got redirected.
    pub fn slot(&self) -> u16 {
        match self {
            Redirect::Moved { slot, .. } | Redirect::Ask { slot, .. } => *slot,
        }
    }

    pub(crate) fn is_ask(&self) -> bool {
        matches!(self, Redirect::Ask { .. })
    }
}

/// Represents an error raised while talking to a Redis cluster.
///
/// For the most part you should be using the Error trait to interact with this
/// rather than the actual struct.
pub struct ClusterError {
    repr: ErrorRepr,
}

/// Library result type.
pub type ClusterResult<T> = Result<T, ClusterError>;

enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, ArcStr),
    Client(ErrorKind, RedisError),
    Redirect(Redirect, RedisError),
    NodeFailures(ErrorKind, &'static str, Vec<(ArcStr, ClusterError)>),
}

impl PartialEq for ClusterError {
    fn eq(&self, other: &ClusterError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Redirect(a, _), ErrorRepr::Redirect(b, _)) => a == b,
            (ErrorRepr::Client(kind_a, a), ErrorRepr::Client(kind_b, b)) => {
                kind_a == kind_b && a == b
            }
            _ => self.kind() == other.kind(),
        }
    }
}

impl From<(ErrorKind, &'static str)> for ClusterError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> ClusterError {
        ClusterError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for ClusterError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> ClusterError {
        ClusterError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail.into()),
        }
    }
}

impl From<RedisError> for ClusterError {
    fn from(err: RedisError) -> ClusterError {
        super::translate(err)
    }
}

impl From<r2d2::Error> for ClusterError {
    fn from(err: r2d2::Error) -> ClusterError {
        ClusterError::from((
            ErrorKind::ResourceFailure,
            "Could not get a resource from the pool",
            err.to_string(),
        ))
    }
}

impl error::Error for ClusterError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Client(_, err) | ErrorRepr::Redirect(_, err) => Some(err),
            ErrorRepr::NodeFailures(_, _, failures) => failures
                .first()
                .map(|(_, err)| err as &(dyn error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Debug for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                desc.fmt(f)?;
                f.write_str(" - ")?;
                fmt::Debug::fmt(&kind, f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, detail) => {
                desc.fmt(f)?;
                f.write_str(" - ")?;
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                detail.fmt(f)
            }
            ErrorRepr::Client(kind, err) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                err.fmt(f)
            }
            ErrorRepr::Redirect(redirect, _) => {
                let (host, port) = redirect.target();
                let kind = if redirect.is_ask() { "ASK" } else { "MOVED" };
                write!(f, "{kind} redirect of slot {} to {host}:{port}", redirect.slot())
            }
            ErrorRepr::NodeFailures(kind, desc, failures) => {
                desc.fmt(f)?;
                f.write_str(" - ")?;
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(" (")?;
                for (index, (node, err)) in failures.iter().enumerate() {
                    if index != 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{node}: {err}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl ClusterError {
    pub(crate) fn from_client(kind: ErrorKind, err: RedisError) -> ClusterError {
        ClusterError {
            repr: ErrorRepr::Client(kind, err),
        }
    }

    pub(crate) fn from_redirect(redirect: Redirect, err: RedisError) -> ClusterError {
        ClusterError {
            repr: ErrorRepr::Redirect(redirect, err),
        }
    }

    /// Creates an error that aggregates the failures of several nodes.
    pub fn from_node_failures(
        kind: ErrorKind,
        desc: &'static str,
        failures: Vec<(ArcStr, ClusterError)>,
    ) -> ClusterError {
        ClusterError {
            repr: ErrorRepr::NodeFailures(kind, desc, failures),
        }
    }

    pub(crate) fn unsupported(desc: &'static str) -> ClusterError {
        ClusterError::from((ErrorKind::Unsupported, desc))
    }

    /// Returns the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        match &self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _)
            | ErrorRepr::Client(kind, _)
            | ErrorRepr::NodeFailures(kind, _, _) => *kind,
            ErrorRepr::Redirect(_, _) => ErrorKind::Redirect,
        }
    }

    /// Returns the error detail.
    pub fn detail(&self) -> Option<&str> {
        match &self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, detail) => Some(detail.as_str()),
            ErrorRepr::Client(_, err) | ErrorRepr::Redirect(_, err) => err.detail(),
            _ => None,
        }
    }

    /// Returns the name of the error category for display purposes.
    pub fn category(&self) -> &str {
        match self.kind() {
            ErrorKind::InvalidUsage => "invalid usage",
            ErrorKind::Unsupported => "unsupported in cluster mode",
            ErrorKind::IllegalArgument => "illegal argument",
            ErrorKind::ClusterStateFailure => "cluster state failure",
            ErrorKind::Redirect => "redirect",
            ErrorKind::TooManyRedirects => "too many redirects",
            ErrorKind::CommandTimeout => "command timeout",
            ErrorKind::ExecutionFailure => "execution failure",
            ErrorKind::ConnectionFailure => "connection failure",
            ErrorKind::ResourceFailure => "resource failure",
            ErrorKind::UnexpectedResponse => "unexpected response",
            ErrorKind::ServerError => "server error",
        }
    }

    /// Returns the redirect carried by a `MOVED` or `ASK` error.
    pub fn redirect(&self) -> Option<&Redirect> {
        match &self.repr {
            ErrorRepr::Redirect(redirect, _) => Some(redirect),
            _ => None,
        }
    }

    /// Returns the per node failures an aggregated error was built from.
    ///
    /// The list is empty for errors that concern a single call.
    pub fn node_failures(&self) -> &[(ArcStr, ClusterError)] {
        match &self.repr {
            ErrorRepr::NodeFailures(_, _, failures) => failures,
            _ => &[],
        }
    }

    /// Returns the client library error this error was translated from, if any.
    pub fn client_error(&self) -> Option<&RedisError> {
        match &self.repr {
            ErrorRepr::Client(_, err) | ErrorRepr::Redirect(_, err) => Some(err),
            _ => None,
        }
    }

    /// Indicates that this failure is a connectivity failure.
    pub fn is_connection_failure(&self) -> bool {
        self.kind() == ErrorKind::ConnectionFailure
    }

    /// Indicates that this error happened before anything was sent to a node.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidUsage | ErrorKind::Unsupported | ErrorKind::IllegalArgument
        )
    }
}
