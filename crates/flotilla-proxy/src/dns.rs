//! DNS exchange for service discovery.
//!
//! An [`Exchanger`] answers a query against a nameserver address. Behaviour
//! is layered on with [`Decorator`]s, applied in order by [`decorate`]:
//!
//! ```text
//! decorate(base, [ignore_truncated()])  ==  ignore_truncated()(base)
//! ```
//!
//! [`RecordExchanger`] is an in-memory base exchanger serving A records
//! for apps under `{app}.{domain}`.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::upstream::{Upstream, normalize_app_id};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub name: String,
}

impl Query {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub name: String,
    pub addr: Ipv4Addr,
    /// Seconds.
    pub ttl: u32,
}

/// A reply and the time it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub answers: Vec<Record>,
    pub truncated: bool,
    pub rtt: Duration,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExchangeError {
    /// The reply did not fit; the partial reply is attached.
    #[error("reply truncated after {} answers", .0.answers.len())]
    Truncated(Exchange),

    #[error("no such name: {0}")]
    NoSuchName(String),

    #[error("nameserver {addr} unreachable: {reason}")]
    Unreachable { addr: String, reason: String },
}

pub trait Exchanger: Send + Sync {
    /// Send `query` to the nameserver at `addr` (`host:port`) and wait for
    /// the reply.
    fn exchange(&self, query: &Query, addr: &str) -> Result<Exchange, ExchangeError>;
}

impl<E: Exchanger + ?Sized> Exchanger for Box<E> {
    fn exchange(&self, query: &Query, addr: &str) -> Result<Exchange, ExchangeError> {
        (**self).exchange(query, addr)
    }
}

impl<E: Exchanger + ?Sized> Exchanger for Arc<E> {
    fn exchange(&self, query: &Query, addr: &str) -> Result<Exchange, ExchangeError> {
        (**self).exchange(query, addr)
    }
}

/// Adapts a closure into an [`Exchanger`].
pub struct FnExchanger<F>(pub F);

impl<F> Exchanger for FnExchanger<F>
where
    F: Fn(&Query, &str) -> Result<Exchange, ExchangeError> + Send + Sync,
{
    fn exchange(&self, query: &Query, addr: &str) -> Result<Exchange, ExchangeError> {
        (self.0)(query, addr)
    }
}

/// Wraps an exchanger in an extra layer of behaviour.
pub type Decorator = Box<dyn Fn(Box<dyn Exchanger>) -> Box<dyn Exchanger> + Send + Sync>;

/// Treat a truncated reply as a successful one.
pub fn ignore_truncated() -> Decorator {
    Box::new(|inner: Box<dyn Exchanger>| -> Box<dyn Exchanger> {
        Box::new(FnExchanger(move |query: &Query, addr: &str| {
            match inner.exchange(query, addr) {
                Err(ExchangeError::Truncated(partial)) => {
                    debug!(name = %query.name, answers = partial.answers.len(), "accepting truncated reply");
                    Ok(partial)
                }
                other => other,
            }
        }))
    })
}

/// Apply `decorators` to `base`, first decorator innermost.
pub fn decorate(
    base: Box<dyn Exchanger>,
    decorators: impl IntoIterator<Item = Decorator>,
) -> Box<dyn Exchanger> {
    decorators
        .into_iter()
        .fold(base, |decorated, decorator| decorator(decorated))
}

/// In-memory A record table.
pub struct RecordExchanger {
    records: Arc<RwLock<HashMap<String, Vec<Ipv4Addr>>>>,
    domain_suffix: String,
    ttl: u32,
    max_answers: usize,
}

impl RecordExchanger {
    /// Serve names under `domain_suffix` with `ttl` seconds. Replies with
    /// more than `max_answers` records are truncated.
    pub fn new(domain_suffix: &str, ttl: u32, max_answers: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            domain_suffix: domain_suffix.trim_matches('.').to_lowercase(),
            ttl,
            max_answers,
        }
    }

    /// Name under which an app's addresses are served.
    pub fn fqdn(&self, app_id: &str) -> String {
        format!("{}.{}", normalize_app_id(app_id), self.domain_suffix)
    }

    /// Replace the addresses served for `app_id`.
    pub fn upsert(&self, app_id: &str, addrs: Vec<Ipv4Addr>) {
        let fqdn = self.fqdn(app_id);
        debug!(fqdn = %fqdn, count = addrs.len(), "upserted DNS record");
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fqdn, addrs);
    }

    /// Stop serving `app_id`.
    pub fn remove(&self, app_id: &str) {
        let fqdn = self.fqdn(app_id);
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&fqdn);
    }

    /// Rebuild the table from upstream targets. Apps without upstreams
    /// disappear; targets whose IP is not IPv4 are skipped.
    pub fn sync_upstreams(&self, upstreams: &[Upstream]) {
        let table: HashMap<String, Vec<Ipv4Addr>> = upstreams
            .iter()
            .map(|u| {
                let mut addrs: Vec<Ipv4Addr> = u
                    .targets
                    .iter()
                    .filter_map(|t| t.task_ip.parse().ok())
                    .collect();
                addrs.dedup();
                (self.fqdn(&u.app_id), addrs)
            })
            .filter(|(_, addrs)| !addrs.is_empty())
            .collect();
        debug!(records = table.len(), "DNS records synced from upstreams");
        *self.records.write().unwrap_or_else(PoisonError::into_inner) = table;
    }
}

impl Exchanger for RecordExchanger {
    fn exchange(&self, query: &Query, _addr: &str) -> Result<Exchange, ExchangeError> {
        let start = Instant::now();
        let name = query.name.trim_end_matches('.').to_lowercase();
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let addrs = records
            .get(&name)
            .ok_or_else(|| ExchangeError::NoSuchName(name.clone()))?;

        let truncated = addrs.len() > self.max_answers;
        let answers = addrs
            .iter()
            .take(self.max_answers)
            .map(|addr| Record {
                name: name.clone(),
                addr: *addr,
                ttl: self.ttl,
            })
            .collect();
        let reply = Exchange {
            answers,
            truncated,
            rtt: start.elapsed(),
        };

        if truncated {
            Err(ExchangeError::Truncated(reply))
        } else {
            Ok(reply)
        }
    }
}
