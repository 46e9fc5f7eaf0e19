//! Offer wrapper tracking what is left of an offer during one scheduling pass.
//!
//! Several slots may be launched against the same offer. Each allocation
//! shrinks the remaining scalars and ports so later allocations only see
//! what is still free. Allocations take `&mut self`, which serialises them
//! per offer.

use flotilla_core::Resources;
use serde::Serialize;
use tracing::debug;

use crate::error::{LaunchError, OfferError};
use crate::proto::{Offer, Resource, ResourceValue};

/// Highest port an offer may carry.
pub const MAX_PORT: u64 = 65535;

/// Resources carved out of an offer for one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
    pub ports: Vec<u64>,
}

impl Allocation {
    /// Resource list for the launch descriptor.
    pub fn to_resources(&self) -> Vec<Resource> {
        let mut resources = vec![
            Resource::scalar("cpus", self.cpus),
            Resource::scalar("mem", self.mem),
        ];
        if self.disk > 0.0 {
            resources.push(Resource::scalar("disk", self.disk));
        }
        if !self.ports.is_empty() {
            resources.push(Resource::ports(&self.ports));
        }
        resources
    }
}

/// An offer plus what is still free in it during the current pass.
#[derive(Debug, Clone)]
pub struct OfferWrapper {
    offer: Offer,
    cpus_remain: f64,
    mem_remain: f64,
    disk_remain: f64,
    ports_remain: Vec<u64>,
}

impl OfferWrapper {
    /// Wrap `offer`, rejecting offers without an id or agent id and port
    /// ranges that are inverted or reach past [`MAX_PORT`].
    pub fn new(offer: Offer) -> Result<Self, OfferError> {
        if offer.id.trim().is_empty() {
            return Err(OfferError::MissingOfferId);
        }
        if offer.agent_id.trim().is_empty() {
            return Err(OfferError::MissingAgentId {
                offer_id: offer.id.clone(),
            });
        }

        let port_ranges = offer
            .resources
            .iter()
            .filter(|r| r.name == "ports")
            .filter_map(|r| match &r.value {
                ResourceValue::Ranges { ranges } => Some(ranges),
                ResourceValue::Scalar { .. } => None,
            })
            .flatten();
        for range in port_ranges {
            if range.begin > range.end || range.end > MAX_PORT {
                return Err(OfferError::InvalidPortRange {
                    offer_id: offer.id.clone(),
                    begin: range.begin,
                    end: range.end,
                });
            }
        }

        let scalar = |name: &str| -> f64 {
            offer
                .resources
                .iter()
                .filter(|r| r.name == name)
                .filter_map(Resource::as_scalar)
                .sum()
        };
        let cpus_remain = scalar("cpus");
        let mem_remain = scalar("mem");
        let disk_remain = scalar("disk");
        let ports_remain = offer
            .resources
            .iter()
            .filter(|r| r.name == "ports")
            .flat_map(Resource::expand_ranges)
            .collect();

        Ok(Self {
            offer,
            cpus_remain,
            mem_remain,
            disk_remain,
            ports_remain,
        })
    }

    pub fn offer(&self) -> &Offer {
        &self.offer
    }

    pub fn id(&self) -> &str {
        &self.offer.id
    }

    pub fn agent_id(&self) -> &str {
        &self.offer.agent_id
    }

    pub fn hostname(&self) -> &str {
        &self.offer.hostname
    }

    pub fn cpus_remain(&self) -> f64 {
        self.cpus_remain
    }

    pub fn mem_remain(&self) -> f64 {
        self.mem_remain
    }

    pub fn disk_remain(&self) -> f64 {
        self.disk_remain
    }

    /// Ports not yet handed to a task in this pass.
    pub fn ports_remain(&self) -> &[u64] {
        &self.ports_remain
    }

    /// Carve `needed` plus `port_count` host ports out of the offer.
    ///
    /// Either everything is allocated or nothing is: the offer is left
    /// untouched on error.
    pub fn allocate(
        &mut self,
        needed: &Resources,
        port_count: usize,
    ) -> Result<Allocation, LaunchError> {
        for (resource, need, have) in [
            ("cpus", needed.cpus, self.cpus_remain),
            ("mem", needed.mem, self.mem_remain),
            ("disk", needed.disk, self.disk_remain),
        ] {
            if need > have {
                return Err(LaunchError::InsufficientResources {
                    offer_id: self.offer.id.clone(),
                    resource,
                    needed: need,
                    available: have,
                });
            }
        }
        if port_count > self.ports_remain.len() {
            return Err(LaunchError::InsufficientPorts {
                offer_id: self.offer.id.clone(),
                needed: port_count,
                available: self.ports_remain.len(),
            });
        }

        self.cpus_remain -= needed.cpus;
        self.mem_remain -= needed.mem;
        self.disk_remain -= needed.disk;
        let ports: Vec<u64> = self.ports_remain.drain(..port_count).collect();

        debug!(
            offer = %self.offer.id,
            cpus = needed.cpus,
            mem = needed.mem,
            ports = ?ports,
            "allocated from offer"
        );

        Ok(Allocation {
            cpus: needed.cpus,
            mem: needed.mem,
            disk: needed.disk,
            ports,
        })
    }
}
