//! Peer address reconciliation
//!
//! Converges the addresses of one IP version on a peer to a desired list.
//! Entries already present keep their row ids; only the difference is
//! created or deleted.

use ipnetwork::IpNetwork;
use std::collections::HashSet;
use tracing::debug;
use wgtun_common::{
    canonical_form, AddressId, IpVersion, PeerAddress, Result, UnitOfWork, WgPeer,
};

/// Changes needed to converge one IP version of a peer's address set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPlan {
    pub version: IpVersion,
    pub retained: Vec<AddressId>,
    pub create: Vec<IpNetwork>,
    pub delete: Vec<AddressId>,
}

impl AddressPlan {
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }

    /// Execute the plan against storage and mirror it on `peer`
    pub fn apply(&self, uow: &UnitOfWork<'_>, peer: &mut WgPeer) -> Result<()> {
        for id in &self.delete {
            uow.delete_peer_address(*id)?;
        }
        peer.addresses.retain(|a| !self.delete.contains(&a.id));

        for network in &self.create {
            let address = uow.insert_peer_address(peer.id, network)?;
            peer.addresses.push(address);
        }

        if !self.is_noop() {
            debug!(
                "Peer {} IPv{} addresses: {} kept, {} added, {} removed",
                peer.id,
                self.version,
                self.retained.len(),
                self.create.len(),
                self.delete.len()
            );
        }
        Ok(())
    }
}

/// Plan the changes turning the `version` subset of `existing` into `desired`
pub fn reconcile(
    existing: &[PeerAddress],
    version: IpVersion,
    desired: &[IpNetwork],
) -> AddressPlan {
    let current: Vec<&PeerAddress> = existing
        .iter()
        .filter(|a| a.ip_version() == version)
        .collect();

    let mut seen = HashSet::new();
    let mut retained = Vec::new();
    let mut create = Vec::new();

    for network in desired.iter().filter(|n| IpVersion::of(n) == version) {
        let canonical = canonical_form(network);
        if !seen.insert(canonical.clone()) {
            continue;
        }
        match current.iter().find(|a| a.canonical() == canonical) {
            Some(found) => retained.push(found.id),
            None => create.push(*network),
        }
    }

    let delete = current
        .iter()
        .map(|a| a.id)
        .filter(|id| !retained.contains(id))
        .collect();

    AddressPlan {
        version,
        retained,
        create,
        delete,
    }
}
