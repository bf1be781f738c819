//! Peer manager tests

mod support;

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use support::*;
use wgtun_common::{
    AllowedIps, CreatePeerRequest, Database, Error, IpVersion, ModifyPeerRequest, WgPeer,
};
use wgtun_engine::{PeerManager, Resolver};

fn setup() -> (Harness, i64) {
    let h = Harness::new();
    let iface = h
        .engine
        .interfaces
        .create_interface(&interface_request("wg0", Some("10.0.0.1/24"), Some("fd00::1/64")))
        .unwrap();
    (h, iface.id)
}

fn peer_request(endpoint: &str, ipv4: &[&str], ipv6: &[&str]) -> CreatePeerRequest {
    CreatePeerRequest {
        public_key: PEER_KEY.to_string(),
        psk: Some(PSK.to_string()),
        keepalive: 25,
        endpoint: endpoint.to_string(),
        port: 51820,
        allowed_ips: AllowedIps {
            ipv4: v4(ipv4),
            ipv6: v6(ipv6),
        },
    }
}

fn canonical(peer: &WgPeer, version: IpVersion) -> Vec<String> {
    let mut list: Vec<String> = peer.addresses_of(version).map(|a| a.canonical()).collect();
    list.sort();
    list
}

#[test]
fn test_literal_endpoint_skips_lookup() {
    let (h, _) = setup();

    h.engine.peers.validate_endpoint("192.0.2.1").unwrap();
    h.engine.peers.validate_endpoint("2001:db8::1").unwrap();
    h.engine.peers.validate_endpoint("[2001:db8::1]").unwrap();

    assert!(h.resolver.lookups().is_empty(), "literal IPs must not be looked up");
}

#[test]
fn test_hostname_endpoint() {
    let (h, _) = setup();

    h.engine.peers.validate_endpoint("vpn.example.org").unwrap();
    let err = h.engine.peers.validate_endpoint("nowhere.invalid").unwrap_err();
    assert!(matches!(err, Error::EndpointResolution { ref endpoint } if endpoint == "nowhere.invalid"));
    assert_eq!(h.resolver.lookups(), vec!["vpn.example.org", "nowhere.invalid"]);
}

#[test]
fn test_create_peer_with_addresses() {
    let (h, iface) = setup();

    let peer = h
        .engine
        .peers
        .create_peer(
            &peer_request(
                "vpn.example.org",
                &["10.0.0.2/32", "10.0.0.2/32", "10.10.0.0/16"],
                &["fd00::2/128"],
            ),
            iface,
        )
        .unwrap();

    assert_eq!(peer.interface_id, iface);
    assert_eq!(canonical(&peer, IpVersion::V4), vec!["10.0.0.2/32", "10.10.0.0/16"]);
    assert_eq!(canonical(&peer, IpVersion::V6), vec!["fd00::2/128"]);
    assert_eq!(h.engine.peers.get_peer(peer.id).unwrap(), peer);
}

#[test]
fn test_create_peer_unresolvable_writes_nothing() {
    let (h, iface) = setup();

    let err = h
        .engine
        .peers
        .create_peer(&peer_request("nowhere.invalid", &["10.0.0.2/32"], &[]), iface)
        .unwrap_err();
    assert!(matches!(err, Error::EndpointResolution { .. }));
    assert!(h.engine.interfaces.get_interface(iface).unwrap().peers.is_empty());
}

#[test]
fn test_create_peer_missing_interface() {
    let (h, _) = setup();
    let err = h
        .engine
        .peers
        .create_peer(&peer_request("192.0.2.1", &[], &[]), 42)
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_modify_retains_unchanged_addresses() {
    let (h, iface) = setup();
    let peer = h
        .engine
        .peers
        .create_peer(
            &peer_request("192.0.2.1", &["10.0.0.2/32", "10.0.0.3/32"], &["fd00::2/128"]),
            iface,
        )
        .unwrap();
    let kept_id = peer
        .addresses
        .iter()
        .find(|a| a.canonical() == "10.0.0.2/32")
        .unwrap()
        .id;
    let ipv6_id = peer.addresses_of(IpVersion::V6).next().unwrap().id;

    let mut req = ModifyPeerRequest::from_peer(&peer);
    req.allowed_ips.ipv4 = v4(&["10.0.0.4/32", "10.0.0.2/32"]);
    req.keepalive = 30;
    let modified = h.engine.peers.modify_peer(&req).unwrap();

    assert_eq!(modified.keepalive, 30);
    assert_eq!(canonical(&modified, IpVersion::V4), vec!["10.0.0.2/32", "10.0.0.4/32"]);
    assert!(modified.addresses.iter().any(|a| a.id == kept_id));
    assert_eq!(
        modified.addresses_of(IpVersion::V6).next().unwrap().id,
        ipv6_id,
        "IPv6 subset must be untouched by an IPv4-only change"
    );
    assert_eq!(h.engine.peers.get_peer(peer.id).unwrap(), modified);
}

#[test]
fn test_modify_is_idempotent() {
    let (h, iface) = setup();
    let peer = h
        .engine
        .peers
        .create_peer(&peer_request("192.0.2.1", &["10.0.0.2/32"], &["fd00::2/128"]), iface)
        .unwrap();

    let req = ModifyPeerRequest::from_peer(&peer);
    let first = h.engine.peers.modify_peer(&req).unwrap();
    let second = h.engine.peers.modify_peer(&req).unwrap();

    assert_eq!(first.addresses, peer.addresses);
    assert_eq!(second.addresses, peer.addresses);
}

#[test]
fn test_relocation_keeps_addresses() {
    let (h, iface) = setup();
    let other = h
        .engine
        .interfaces
        .create_interface(&interface_request("wg1", Some("10.1.0.1/24"), None))
        .unwrap();
    let peer = h
        .engine
        .peers
        .create_peer(&peer_request("192.0.2.1", &["10.0.0.2/32"], &["fd00::2/128"]), iface)
        .unwrap();

    let mut req = ModifyPeerRequest::from_peer(&peer);
    req.tunnel_id = Some(other.id);
    let moved = h.engine.peers.modify_peer(&req).unwrap();

    assert_eq!(moved.interface_id, other.id);
    assert_eq!(moved.addresses, peer.addresses);
    assert!(h.engine.interfaces.get_interface(iface).unwrap().peers.is_empty());
    assert_eq!(h.engine.interfaces.get_interface(other.id).unwrap().peers, vec![moved]);
}

#[test]
fn test_relocation_to_missing_interface() {
    let (h, iface) = setup();
    let peer = h
        .engine
        .peers
        .create_peer(&peer_request("192.0.2.1", &["10.0.0.2/32"], &[]), iface)
        .unwrap();

    let mut req = ModifyPeerRequest::from_peer(&peer);
    req.tunnel_id = Some(999);
    req.keepalive = 60;
    assert!(h.engine.peers.modify_peer(&req).unwrap_err().is_not_found());
    assert_eq!(h.engine.peers.get_peer(peer.id).unwrap(), peer);
}

#[test]
fn test_modify_without_id() {
    let (h, iface) = setup();
    let peer = h
        .engine
        .peers
        .create_peer(&peer_request("192.0.2.1", &[], &[]), iface)
        .unwrap();

    let mut req = ModifyPeerRequest::from_peer(&peer);
    req.id = None;
    let err = h.engine.peers.modify_peer(&req).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "Resource not found: peer ID not specified");
}

#[test]
fn test_deferred_modify_needs_flush() {
    let db = Database::open_memory().unwrap();
    let peers = PeerManager::new(
        db.clone(),
        std::sync::Arc::new(StaticResolver::default()),
    );

    let uow = db.begin().unwrap();
    let iface = uow.insert_interface("wg0", PRIVATE_KEY, None).unwrap();
    uow.flush().unwrap();
    let peer = peers
        .create_peer(&peer_request("192.0.2.1", &["10.0.0.2/32"], &[]), iface)
        .unwrap();

    let mut req = ModifyPeerRequest::from_peer(&peer);
    req.allowed_ips.ipv4 = v4(&["10.0.0.9/32"]);

    {
        let uow = db.begin().unwrap();
        let staged = peers.modify_peer_deferred(&uow, &req).unwrap();
        assert_eq!(canonical(&staged, IpVersion::V4), vec!["10.0.0.9/32"]);
        // dropped without flush
    }
    assert_eq!(peers.get_peer(peer.id).unwrap(), peer);

    let uow = db.begin().unwrap();
    peers.modify_peer_deferred(&uow, &req).unwrap();
    uow.flush().unwrap();
    assert_eq!(
        canonical(&peers.get_peer(peer.id).unwrap(), IpVersion::V4),
        vec!["10.0.0.9/32"]
    );
}

#[test]
fn test_batch_modify_is_atomic() {
    let (h, iface) = setup();
    let a = h
        .engine
        .peers
        .create_peer(&peer_request("192.0.2.1", &["10.0.0.2/32"], &[]), iface)
        .unwrap();
    let b = h
        .engine
        .peers
        .create_peer(&peer_request("192.0.2.2", &["10.0.0.3/32"], &[]), iface)
        .unwrap();

    let mut first = ModifyPeerRequest::from_peer(&a);
    first.keepalive = 10;
    let mut second = ModifyPeerRequest::from_peer(&b);
    second.endpoint = "nowhere.invalid".to_string();

    let err = h.engine.peers.modify_peers(&[first.clone(), second]).unwrap_err();
    assert!(matches!(err, Error::EndpointResolution { .. }));
    assert_eq!(h.engine.peers.get_peer(a.id).unwrap().keepalive, 25);

    let mut second = ModifyPeerRequest::from_peer(&b);
    second.keepalive = 20;
    let updated = h.engine.peers.modify_peers(&[first, second]).unwrap();
    assert_eq!(updated.len(), 2);
    assert_eq!(h.engine.peers.get_peer(a.id).unwrap().keepalive, 10);
    assert_eq!(h.engine.peers.get_peer(b.id).unwrap().keepalive, 20);
}

#[test]
fn test_remove_peer() {
    let (h, iface) = setup();
    let peer = h
        .engine
        .peers
        .create_peer(&peer_request("192.0.2.1", &["10.0.0.2/32"], &[]), iface)
        .unwrap();

    h.engine.peers.remove_peer(peer.id).unwrap();
    assert!(h.engine.peers.get_peer(peer.id).unwrap_err().is_not_found());
    assert!(h.engine.peers.remove_peer(peer.id).unwrap_err().is_not_found());
}

#[test]
fn test_empty_psk_is_absent() {
    let (h, iface) = setup();
    let mut req = peer_request("192.0.2.1", &[], &[]);
    req.psk = Some(String::new());

    let peer = h.engine.peers.create_peer(&req, iface).unwrap();
    assert_eq!(peer.psk, None);

    req.psk = Some("short".to_string());
    assert!(matches!(
        h.engine.peers.create_peer(&req, iface).unwrap_err(),
        Error::InvalidConfig(_)
    ));
}

/// Resolver noting whether the database was locked during each lookup
struct LockAwareResolver {
    db: Database,
    locked: Mutex<Vec<bool>>,
}

impl Resolver for LockAwareResolver {
    fn resolve(&self, _host: &str) -> Vec<IpAddr> {
        self.locked.lock().unwrap().push(self.db.in_use());
        vec!["192.0.2.10".parse().unwrap()]
    }
}

#[test]
fn test_endpoint_lookup_outside_transaction() {
    let h = Harness::new();
    let db = Database::open_memory().unwrap();
    let resolver = Arc::new(LockAwareResolver {
        db: db.clone(),
        locked: Mutex::new(Vec::new()),
    });
    let engine = wgtun_engine::Engine::with_collaborators(
        &h.config,
        db.clone(),
        h.exec.clone(),
        resolver.clone(),
    );
    let iface = engine
        .interfaces
        .create_interface(&interface_request("wg0", Some("10.0.0.1/24"), None))
        .unwrap();
    let peers = &engine.peers;

    let peer = peers
        .create_peer(&peer_request("vpn.example.org", &["10.0.0.2/32"], &[]), iface.id)
        .unwrap();
    let mut req = ModifyPeerRequest::from_peer(&peer);
    req.keepalive = 30;
    peers.modify_peer(&req).unwrap();
    peers.modify_peers(&[req.clone(), req]).unwrap();

    let locked = resolver.locked.lock().unwrap().clone();
    assert_eq!(locked, vec![false; 4]);
}
