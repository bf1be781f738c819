//! SQLite persistence for interfaces, peers and their addresses

use crate::types::*;
use crate::{Error, Result};
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self::from_connection(conn)?;
        info!("Opened database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Interfaces
            CREATE TABLE IF NOT EXISTS wireguard_interfaces (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                private_key TEXT NOT NULL,
                port INTEGER
            );

            -- Interface addresses, at most one per family
            CREATE TABLE IF NOT EXISTS wireguard_interface_ipv4s (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                prefix INTEGER NOT NULL,
                interface_id INTEGER NOT NULL UNIQUE
                    REFERENCES wireguard_interfaces(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS wireguard_interface_ipv6s (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                prefix INTEGER NOT NULL,
                interface_id INTEGER NOT NULL UNIQUE
                    REFERENCES wireguard_interfaces(id) ON DELETE CASCADE
            );

            -- Peers
            CREATE TABLE IF NOT EXISTS wireguard_peers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                public_key TEXT NOT NULL,
                psk TEXT,
                keepalive INTEGER NOT NULL,
                endpoint TEXT NOT NULL,
                port INTEGER NOT NULL,
                interface_id INTEGER NOT NULL
                    REFERENCES wireguard_interfaces(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_wireguard_peers_interface
                ON wireguard_peers(interface_id);

            -- Peer allowed addresses
            CREATE TABLE IF NOT EXISTS wireguard_peer_addresses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                prefix INTEGER NOT NULL,
                peer_id INTEGER NOT NULL
                    REFERENCES wireguard_peers(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_wireguard_peer_addresses_peer
                ON wireguard_peer_addresses(peer_id);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Whether a unit of work currently holds the connection
    pub fn in_use(&self) -> bool {
        self.conn.is_locked()
    }

    /// Start a unit of work. The connection stays locked until the unit is
    /// flushed or dropped; dropping an unflushed unit discards its changes.
    pub fn begin(&self) -> Result<UnitOfWork<'_>> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(UnitOfWork {
            conn,
            finished: false,
        })
    }
}

/// Column values of a peer row
#[derive(Debug, Clone, Copy)]
pub struct PeerRecord<'a> {
    pub public_key: &'a str,
    pub psk: Option<&'a str>,
    pub keepalive: u32,
    pub endpoint: &'a str,
    pub port: u16,
}

/// Transaction over the shared connection carrying all repository operations
pub struct UnitOfWork<'db> {
    conn: MutexGuard<'db, Connection>,
    finished: bool,
}

impl<'db> UnitOfWork<'db> {
    /// Commit all staged changes
    pub fn flush(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        debug!("Unit of work committed");
        Ok(())
    }

    /// Discard all staged changes
    pub fn rollback(mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        self.finished = true;
        Ok(())
    }

    // ========================================================================
    // Interfaces
    // ========================================================================

    pub fn find_interface(&self, id: InterfaceId) -> Result<Option<WgInterface>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, private_key, port FROM wireguard_interfaces WHERE id = ?1",
                params![id],
                interface_row,
            )
            .optional()?;

        row.map(|row| self.hydrate_interface(row)).transpose()
    }

    pub fn find_interface_by_name(&self, name: &str) -> Result<Option<WgInterface>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, private_key, port FROM wireguard_interfaces WHERE name = ?1",
                params![name],
                interface_row,
            )
            .optional()?;

        row.map(|row| self.hydrate_interface(row)).transpose()
    }

    pub fn find_all_interfaces(&self) -> Result<Vec<WgInterface>> {
        let rows = {
            let mut stmt = self
                .conn
                .prepare("SELECT id, name, private_key, port FROM wireguard_interfaces ORDER BY id")?;
            let rows = stmt.query_map([], interface_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        rows.into_iter()
            .map(|row| self.hydrate_interface(row))
            .collect()
    }

    /// Whether another interface already uses `name`
    pub fn interface_name_taken(&self, name: &str, except: Option<InterfaceId>) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM wireguard_interfaces WHERE name = ?1 AND id != ?2",
            params![name, except.unwrap_or(-1)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_interface(
        &self,
        name: &str,
        private_key: &str,
        port: Option<u16>,
    ) -> Result<InterfaceId> {
        self.conn.execute(
            "INSERT INTO wireguard_interfaces (name, private_key, port) VALUES (?1, ?2, ?3)",
            params![name, private_key, port],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!("Inserted interface {} with id {}", name, id);
        Ok(id)
    }

    pub fn update_interface(
        &self,
        id: InterfaceId,
        name: &str,
        private_key: &str,
        port: Option<u16>,
    ) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE wireguard_interfaces SET name = ?1, private_key = ?2, port = ?3 WHERE id = ?4",
            params![name, private_key, port, id],
        )?;
        if rows == 0 {
            return Err(Error::not_found("interface", id));
        }
        Ok(())
    }

    /// Delete an interface together with everything it owns
    pub fn delete_interface(&self, id: InterfaceId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM wireguard_interfaces WHERE id = ?1", params![id])?;
        if rows > 0 {
            debug!("Deleted interface with id {}", id);
        }
        Ok(rows > 0)
    }

    /// Set or clear the IPv4 address, keeping the row id of an existing address
    pub fn set_interface_ipv4(
        &self,
        interface_id: InterfaceId,
        address: Option<Ipv4Network>,
    ) -> Result<Option<InterfaceIpv4>> {
        let id = self.set_interface_address(
            "wireguard_interface_ipv4s",
            interface_id,
            address.map(|net| (IpAddr::V4(net.ip()), net.prefix())),
        )?;
        Ok(id.zip(address).map(|(id, address)| InterfaceIpv4 { id, address }))
    }

    /// Set or clear the IPv6 address, keeping the row id of an existing address
    pub fn set_interface_ipv6(
        &self,
        interface_id: InterfaceId,
        address: Option<Ipv6Network>,
    ) -> Result<Option<InterfaceIpv6>> {
        let id = self.set_interface_address(
            "wireguard_interface_ipv6s",
            interface_id,
            address.map(|net| (IpAddr::V6(net.ip()), net.prefix())),
        )?;
        Ok(id.zip(address).map(|(id, address)| InterfaceIpv6 { id, address }))
    }

    fn set_interface_address(
        &self,
        table: &str,
        interface_id: InterfaceId,
        address: Option<(IpAddr, u8)>,
    ) -> Result<Option<i64>> {
        let Some((addr, prefix)) = address else {
            self.conn.execute(
                &format!("DELETE FROM {} WHERE interface_id = ?1", table),
                params![interface_id],
            )?;
            return Ok(None);
        };

        let existing: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT id FROM {} WHERE interface_id = ?1", table),
                params![interface_id],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                self.conn.execute(
                    &format!("UPDATE {} SET address = ?1, prefix = ?2 WHERE id = ?3", table),
                    params![addr.to_string(), prefix, id],
                )?;
                Ok(Some(id))
            }
            None => {
                self.conn.execute(
                    &format!(
                        "INSERT INTO {} (address, prefix, interface_id) VALUES (?1, ?2, ?3)",
                        table
                    ),
                    params![addr.to_string(), prefix, interface_id],
                )?;
                Ok(Some(self.conn.last_insert_rowid()))
            }
        }
    }

    // ========================================================================
    // Peers
    // ========================================================================

    pub fn find_peer(&self, id: PeerId) -> Result<Option<WgPeer>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, interface_id, public_key, psk, keepalive, endpoint, port
                 FROM wireguard_peers WHERE id = ?1",
                params![id],
                peer_row,
            )
            .optional()?;

        row.map(|mut peer| {
            peer.addresses = self.find_peer_addresses(peer.id)?;
            Ok(peer)
        })
        .transpose()
    }

    pub fn find_peers_of(&self, interface_id: InterfaceId) -> Result<Vec<WgPeer>> {
        let mut peers = {
            let mut stmt = self.conn.prepare(
                "SELECT id, interface_id, public_key, psk, keepalive, endpoint, port
                 FROM wireguard_peers WHERE interface_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![interface_id], peer_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        for peer in &mut peers {
            peer.addresses = self.find_peer_addresses(peer.id)?;
        }
        Ok(peers)
    }

    pub fn insert_peer(&self, interface_id: InterfaceId, record: &PeerRecord<'_>) -> Result<PeerId> {
        self.conn.execute(
            "INSERT INTO wireguard_peers (public_key, psk, keepalive, endpoint, port, interface_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.public_key,
                record.psk,
                record.keepalive,
                record.endpoint,
                record.port,
                interface_id
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!("Inserted peer {} on interface {}", id, interface_id);
        Ok(id)
    }

    /// Update peer columns, moving it to `interface_id` when that differs
    pub fn update_peer(
        &self,
        id: PeerId,
        interface_id: InterfaceId,
        record: &PeerRecord<'_>,
    ) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE wireguard_peers
             SET public_key = ?1, psk = ?2, keepalive = ?3, endpoint = ?4, port = ?5,
                 interface_id = ?6
             WHERE id = ?7",
            params![
                record.public_key,
                record.psk,
                record.keepalive,
                record.endpoint,
                record.port,
                interface_id,
                id
            ],
        )?;
        if rows == 0 {
            return Err(Error::not_found("peer", id));
        }
        Ok(())
    }

    pub fn delete_peer(&self, id: PeerId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM wireguard_peers WHERE id = ?1", params![id])?;
        if rows > 0 {
            debug!("Deleted peer with id {}", id);
        }
        Ok(rows > 0)
    }

    // ========================================================================
    // Peer addresses
    // ========================================================================

    pub fn find_peer_addresses(&self, peer_id: PeerId) -> Result<Vec<PeerAddress>> {
        let rows = {
            let mut stmt = self.conn.prepare(
                "SELECT id, address, prefix FROM wireguard_peer_addresses
                 WHERE peer_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![peer_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u8>(2)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        rows.into_iter()
            .map(|(id, address, prefix)| {
                Ok(PeerAddress {
                    id,
                    network: parse_network(&address, prefix)?,
                })
            })
            .collect()
    }

    pub fn insert_peer_address(&self, peer_id: PeerId, network: &IpNetwork) -> Result<PeerAddress> {
        self.conn.execute(
            "INSERT INTO wireguard_peer_addresses (address, prefix, peer_id) VALUES (?1, ?2, ?3)",
            params![network.ip().to_string(), network.prefix(), peer_id],
        )?;
        Ok(PeerAddress {
            id: self.conn.last_insert_rowid(),
            network: *network,
        })
    }

    pub fn delete_peer_address(&self, id: AddressId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM wireguard_peer_addresses WHERE id = ?1",
            params![id],
        )?;
        Ok(rows > 0)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn hydrate_interface(&self, row: InterfaceRow) -> Result<WgInterface> {
        let ipv4 = self
            .find_interface_address("wireguard_interface_ipv4s", row.id)?
            .map(|(id, network)| match network {
                IpNetwork::V4(address) => Ok(InterfaceIpv4 { id, address }),
                IpNetwork::V6(_) => Err(corrupt("IPv6 address stored as interface IPv4")),
            })
            .transpose()?;
        let ipv6 = self
            .find_interface_address("wireguard_interface_ipv6s", row.id)?
            .map(|(id, network)| match network {
                IpNetwork::V6(address) => Ok(InterfaceIpv6 { id, address }),
                IpNetwork::V4(_) => Err(corrupt("IPv4 address stored as interface IPv6")),
            })
            .transpose()?;

        Ok(WgInterface {
            id: row.id,
            name: row.name,
            private_key: row.private_key,
            port: row.port,
            ipv4,
            ipv6,
            peers: self.find_peers_of(row.id)?,
        })
    }

    fn find_interface_address(
        &self,
        table: &str,
        interface_id: InterfaceId,
    ) -> Result<Option<(i64, IpNetwork)>> {
        let row: Option<(i64, String, u8)> = self
            .conn
            .query_row(
                &format!(
                    "SELECT id, address, prefix FROM {} WHERE interface_id = ?1",
                    table
                ),
                params![interface_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(id, address, prefix)| Ok((id, parse_network(&address, prefix)?)))
            .transpose()
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => debug!("Unit of work discarded"),
            Err(e) => warn!("Failed to roll back unit of work: {}", e),
        }
    }
}

struct InterfaceRow {
    id: InterfaceId,
    name: String,
    private_key: String,
    port: Option<u16>,
}

fn interface_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InterfaceRow> {
    Ok(InterfaceRow {
        id: row.get(0)?,
        name: row.get(1)?,
        private_key: row.get(2)?,
        port: row.get(3)?,
    })
}

fn peer_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WgPeer> {
    Ok(WgPeer {
        id: row.get(0)?,
        interface_id: row.get(1)?,
        public_key: row.get(2)?,
        psk: row.get(3)?,
        keepalive: row.get(4)?,
        endpoint: row.get(5)?,
        port: row.get(6)?,
        addresses: Vec::new(),
    })
}

fn parse_network(address: &str, prefix: u8) -> Result<IpNetwork> {
    let ip: IpAddr = address
        .parse()
        .map_err(|_| corrupt(&format!("invalid stored address {}", address)))?;
    IpNetwork::new(ip, prefix)
        .map_err(|e| corrupt(&format!("invalid stored network {}/{}: {}", address, prefix, e)))
}

fn corrupt(msg: &str) -> Error {
    Error::Internal(format!("corrupt database row: {}", msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record<'a>(public_key: &'a str) -> PeerRecord<'a> {
        PeerRecord {
            public_key,
            psk: None,
            keepalive: 25,
            endpoint: "vpn.example.org",
            port: 51820,
        }
    }

    #[test]
    fn test_unit_of_work_holds_connection() {
        let db = Database::open_memory().unwrap();
        assert!(!db.in_use());

        let uow = db.begin().unwrap();
        assert!(db.in_use());
        uow.flush().unwrap();
        assert!(!db.in_use());

        drop(db.begin().unwrap());
        assert!(!db.in_use());
    }

    #[test]
    fn test_interface_crud() {
        let db = Database::open_memory().unwrap();

        let uow = db.begin().unwrap();
        let id = uow.insert_interface("wg0", "key", Some(51820)).unwrap();
        uow.set_interface_ipv4(id, Some("10.0.0.1/24".parse().unwrap()))
            .unwrap();
        uow.flush().unwrap();

        let uow = db.begin().unwrap();
        let iface = uow.find_interface(id).unwrap().unwrap();
        assert_eq!(iface.name, "wg0");
        assert_eq!(iface.port, Some(51820));
        assert_eq!(iface.ipv4.unwrap().address.to_string(), "10.0.0.1/24");
        assert!(iface.ipv6.is_none());
        assert_eq!(iface.ip_stack(), Some(IpStack::Ipv4));

        assert!(uow.find_interface_by_name("wg0").unwrap().is_some());
        assert!(uow.interface_name_taken("wg0", None).unwrap());
        assert!(!uow.interface_name_taken("wg0", Some(id)).unwrap());
        assert!(uow.delete_interface(id).unwrap());
        assert!(uow.find_interface(id).unwrap().is_none());
    }

    #[test]
    fn test_dropped_unit_rolls_back() {
        let db = Database::open_memory().unwrap();

        {
            let uow = db.begin().unwrap();
            uow.insert_interface("wg0", "key", None).unwrap();
        }

        let uow = db.begin().unwrap();
        assert!(uow.find_all_interfaces().unwrap().is_empty());
    }

    #[test]
    fn test_address_upsert_keeps_id() {
        let db = Database::open_memory().unwrap();
        let uow = db.begin().unwrap();
        let id = uow.insert_interface("wg0", "key", None).unwrap();

        let first = uow
            .set_interface_ipv6(id, Some("fd00::1/64".parse().unwrap()))
            .unwrap()
            .unwrap();
        let second = uow
            .set_interface_ipv6(id, Some("fd00::2/64".parse().unwrap()))
            .unwrap()
            .unwrap();
        assert_eq!(first.id, second.id);

        assert!(uow.set_interface_ipv6(id, None).unwrap().is_none());
        assert!(uow.find_interface(id).unwrap().unwrap().ipv6.is_none());
    }

    #[test]
    fn test_interface_delete_cascades() {
        let db = Database::open_memory().unwrap();
        let uow = db.begin().unwrap();
        let iface = uow.insert_interface("wg0", "key", None).unwrap();
        let peer = uow.insert_peer(iface, &record("peer-a")).unwrap();
        let addr = uow
            .insert_peer_address(peer, &"10.0.0.2/32".parse().unwrap())
            .unwrap();

        assert!(uow.delete_interface(iface).unwrap());
        assert!(uow.find_peer(peer).unwrap().is_none());
        assert!(!uow.delete_peer_address(addr.id).unwrap());
    }

    #[test]
    fn test_peer_relocation() {
        let db = Database::open_memory().unwrap();
        let uow = db.begin().unwrap();
        let a = uow.insert_interface("wg0", "key", None).unwrap();
        let b = uow.insert_interface("wg1", "key", None).unwrap();
        let peer = uow.insert_peer(a, &record("peer-a")).unwrap();
        uow.insert_peer_address(peer, &"fd00::2/128".parse().unwrap())
            .unwrap();

        uow.update_peer(peer, b, &record("peer-a")).unwrap();

        assert!(uow.find_interface(a).unwrap().unwrap().peers.is_empty());
        let moved = uow.find_interface(b).unwrap().unwrap();
        assert_eq!(moved.peers.len(), 1);
        assert_eq!(moved.peers[0].addresses[0].canonical(), "fd00::2/128");
    }

    #[test]
    fn test_update_missing_peer() {
        let db = Database::open_memory().unwrap();
        let uow = db.begin().unwrap();
        let iface = uow.insert_interface("wg0", "key", None).unwrap();
        let err = uow.update_peer(42, iface, &record("x")).unwrap_err();
        assert!(err.is_not_found());
    }
}
