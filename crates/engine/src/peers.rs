//! Peer management

use crate::keys::validate_key;
use crate::reconciler::reconcile;
use crate::resolver::{parse_literal, Resolver};
use ipnetwork::IpNetwork;
use std::sync::Arc;
use tracing::{debug, info};
use wgtun_common::db::PeerRecord;
use wgtun_common::{
    AllowedIps, CreatePeerRequest, Database, Error, InterfaceId, IpVersion, ModifyPeerRequest,
    PeerId, Result, UnitOfWork, WgPeer,
};

/// CRUD over peers, including relocation between interfaces
pub struct PeerManager {
    db: Database,
    resolver: Arc<dyn Resolver>,
}

/// Checked peer payload, ready to be written
struct ValidatedPeer<'a> {
    record: PeerRecord<'a>,
    ipv4: Vec<IpNetwork>,
    ipv6: Vec<IpNetwork>,
}

impl PeerManager {
    pub fn new(db: Database, resolver: Arc<dyn Resolver>) -> Self {
        Self { db, resolver }
    }

    /// Accept literal IPs as they are, otherwise require the name to resolve
    pub fn validate_endpoint(&self, endpoint: &str) -> Result<()> {
        if parse_literal(endpoint).is_some() {
            return Ok(());
        }

        let addrs = self.resolver.resolve(endpoint);
        if addrs.is_empty() {
            return Err(Error::EndpointResolution {
                endpoint: endpoint.to_string(),
            });
        }
        debug!("Endpoint {} resolves to {:?}", endpoint, addrs);
        Ok(())
    }

    /// Create a peer on `interface_id` with its allowed addresses
    pub fn create_peer(&self, req: &CreatePeerRequest, interface_id: InterfaceId) -> Result<WgPeer> {
        let peer = self.validate(
            &req.public_key,
            req.psk.as_deref(),
            req.keepalive,
            &req.endpoint,
            req.port,
            &req.allowed_ips,
        )?;

        let uow = self.db.begin()?;
        if uow.find_interface(interface_id)?.is_none() {
            return Err(Error::not_found("interface", interface_id));
        }

        let id = uow.insert_peer(interface_id, &peer.record)?;
        let mut created = WgPeer {
            id,
            interface_id,
            public_key: peer.record.public_key.to_string(),
            psk: peer.record.psk.map(str::to_string),
            keepalive: peer.record.keepalive,
            endpoint: peer.record.endpoint.to_string(),
            port: peer.record.port,
            addresses: Vec::new(),
        };
        reconcile(&[], IpVersion::V4, &peer.ipv4).apply(&uow, &mut created)?;
        reconcile(&[], IpVersion::V6, &peer.ipv6).apply(&uow, &mut created)?;
        uow.flush()?;

        info!("Created peer {} on interface {}", id, interface_id);
        Ok(created)
    }

    /// Modify a peer and commit immediately
    pub fn modify_peer(&self, req: &ModifyPeerRequest) -> Result<WgPeer> {
        let (id, update) = self.prepare(req)?;

        let uow = self.db.begin()?;
        let peer = self.apply_update(&uow, id, req.tunnel_id, &update)?;
        uow.flush()?;
        Ok(peer)
    }

    /// Modify several peers in one transaction
    pub fn modify_peers(&self, reqs: &[ModifyPeerRequest]) -> Result<Vec<WgPeer>> {
        let updates = reqs
            .iter()
            .map(|req| self.prepare(req))
            .collect::<Result<Vec<_>>>()?;

        let uow = self.db.begin()?;
        let peers = reqs
            .iter()
            .zip(&updates)
            .map(|(req, (id, update))| self.apply_update(&uow, *id, req.tunnel_id, update))
            .collect::<Result<Vec<_>>>()?;
        uow.flush()?;
        Ok(peers)
    }

    /// Stage a peer modification in a caller-owned unit of work. Nothing is
    /// committed until the caller flushes `uow`.
    ///
    /// Endpoint resolution runs while `uow` holds the write lock. Callers
    /// that need no shared transaction should use [`Self::modify_peer`].
    pub fn modify_peer_deferred(&self, uow: &UnitOfWork<'_>, req: &ModifyPeerRequest) -> Result<WgPeer> {
        let (id, update) = self.prepare(req)?;
        self.apply_update(uow, id, req.tunnel_id, &update)
    }

    /// Checks that need no database access, endpoint lookup included
    fn prepare<'a>(&self, req: &'a ModifyPeerRequest) -> Result<(PeerId, ValidatedPeer<'a>)> {
        let id = req.id.ok_or_else(|| Error::MissingId {
            kind: "peer".to_string(),
        })?;
        let update = self.validate(
            &req.public_key,
            req.psk.as_deref(),
            req.keepalive,
            &req.endpoint,
            req.port,
            &req.allowed_ips,
        )?;
        Ok((id, update))
    }

    fn apply_update(
        &self,
        uow: &UnitOfWork<'_>,
        id: PeerId,
        tunnel_id: Option<InterfaceId>,
        update: &ValidatedPeer<'_>,
    ) -> Result<WgPeer> {
        let mut peer = uow
            .find_peer(id)?
            .ok_or_else(|| Error::not_found("peer", id))?;

        let target = tunnel_id.unwrap_or(peer.interface_id);
        if target != peer.interface_id {
            if uow.find_interface(target)?.is_none() {
                return Err(Error::not_found("interface", target));
            }
            info!(
                "Relocating peer {} from interface {} to {}",
                id, peer.interface_id, target
            );
        }

        uow.update_peer(id, target, &update.record)?;
        peer.interface_id = target;
        peer.public_key = update.record.public_key.to_string();
        peer.psk = update.record.psk.map(str::to_string);
        peer.keepalive = update.record.keepalive;
        peer.endpoint = update.record.endpoint.to_string();
        peer.port = update.record.port;

        let ipv4 = reconcile(&peer.addresses, IpVersion::V4, &update.ipv4);
        ipv4.apply(uow, &mut peer)?;
        let ipv6 = reconcile(&peer.addresses, IpVersion::V6, &update.ipv6);
        ipv6.apply(uow, &mut peer)?;

        info!("Updated peer {}", id);
        Ok(peer)
    }

    /// Delete a peer with its addresses
    pub fn remove_peer(&self, id: PeerId) -> Result<()> {
        let uow = self.db.begin()?;
        if !uow.delete_peer(id)? {
            return Err(Error::not_found("peer", id));
        }
        uow.flush()?;
        info!("Removed peer {}", id);
        Ok(())
    }

    pub fn get_peer(&self, id: PeerId) -> Result<WgPeer> {
        self.db
            .begin()?
            .find_peer(id)?
            .ok_or_else(|| Error::not_found("peer", id))
    }

    fn validate<'a>(
        &self,
        public_key: &'a str,
        psk: Option<&'a str>,
        keepalive: u32,
        endpoint: &'a str,
        port: u16,
        allowed_ips: &AllowedIps,
    ) -> Result<ValidatedPeer<'a>> {
        let public_key = public_key.trim();
        validate_key("public key", public_key)?;

        let psk = psk.map(str::trim).filter(|psk| !psk.is_empty());
        if let Some(psk) = psk {
            validate_key("pre-shared key", psk)?;
        }

        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(Error::InvalidConfig("peer endpoint must not be empty".to_string()));
        }
        let ipv4 = allowed_ips.networks(IpVersion::V4)?;
        let ipv6 = allowed_ips.networks(IpVersion::V6)?;
        self.validate_endpoint(endpoint)?;

        Ok(ValidatedPeer {
            record: PeerRecord {
                public_key,
                psk,
                keepalive,
                endpoint,
                port,
            },
            ipv4,
            ipv6,
        })
    }
}
