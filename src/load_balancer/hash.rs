//! Hash-based strategies: source IP affinity and caller-supplied hashes.
//!
//! # Design Decisions
//! - index = hash % server count, so affinity holds only while membership
//!   and ordering are unchanged
//! - Requests without a usable key fall back to a uniform random pick

use std::net::IpAddr;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::load_balancer::{random::pick_uniform, Balancer};
use crate::upstream::ServerRef;

/// Hash of the client address, if the context carries one.
///
/// IPv4 is the address as a big-endian `u32`; IPv6 uses its last 8 bytes as a
/// big-endian `u64`. IPv4-mapped IPv6 addresses hash as IPv4.
pub fn source_ip_hash(ctx: &RequestContext) -> Option<u64> {
    let ip = ctx.remote_addr?.ip();
    let hash = match ip {
        IpAddr::V4(v4) => u64::from(u32::from(v4)),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => u64::from(u32::from(v4)),
            None => {
                let octets = v6.octets();
                let mut tail = [0u8; 8];
                tail.copy_from_slice(&octets[8..]);
                u64::from_be_bytes(tail)
            }
        },
    };
    Some(hash)
}

fn pick_by_hash(hash: Option<u64>, servers: &[ServerRef]) -> Option<ServerRef> {
    if servers.is_empty() {
        return None;
    }
    match hash {
        Some(h) => Some(Arc::clone(&servers[(h % servers.len() as u64) as usize])),
        None => pick_uniform(servers),
    }
}

/// Session affinity keyed on the client IP.
#[derive(Debug, Default)]
pub struct SourceIpHash;

impl SourceIpHash {
    pub const POLICY: &'static str = "source_ip_hash";

    pub fn new() -> Self {
        Self
    }
}

impl Balancer for SourceIpHash {
    fn policy(&self) -> &str {
        Self::POLICY
    }

    fn select(&self, ctx: &RequestContext, servers: &[ServerRef]) -> Option<ServerRef> {
        pick_by_hash(source_ip_hash(ctx), servers)
    }
}

type HashFn = dyn Fn(&RequestContext) -> Option<u64> + Send + Sync;

/// Hash-indexed selection with a caller-supplied key function.
pub struct ConsistentHash {
    policy: String,
    hash: Box<HashFn>,
}

impl ConsistentHash {
    /// `hash` returning `None` means "no key"; such requests are spread randomly.
    pub fn new<F>(policy: impl Into<String>, hash: F) -> Self
    where
        F: Fn(&RequestContext) -> Option<u64> + Send + Sync + 'static,
    {
        Self {
            policy: policy.into(),
            hash: Box::new(hash),
        }
    }
}

impl std::fmt::Debug for ConsistentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistentHash")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Balancer for ConsistentHash {
    fn policy(&self) -> &str {
        &self.policy
    }

    fn select(&self, ctx: &RequestContext, servers: &[ServerRef]) -> Option<ServerRef> {
        pick_by_hash((self.hash)(ctx), servers)
    }
}
