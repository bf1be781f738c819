//! Interface management
//!
//! Validated create/edit/remove of WireGuard interfaces and their address
//! stacks. Every write happens inside a single unit of work.

use crate::keys::{validate_key, KeyGenerator};
use crate::service::ServiceStatus;
use ipnetwork::{Ipv4Network, Ipv6Network};
use std::sync::Arc;
use tracing::{debug, info};
use wgtun_common::{
    Database, Error, InterfaceDetail, InterfaceId, InterfaceRequest, InterfaceSummary, IpStack,
    Result, WgInterface,
};

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL)
pub const MAX_NAME_LEN: usize = 15;

/// CRUD over WireGuard interfaces
pub struct InterfaceManager {
    db: Database,
    keys: Arc<dyn KeyGenerator>,
    service: Arc<dyn ServiceStatus>,
}

impl InterfaceManager {
    pub fn new(db: Database, keys: Arc<dyn KeyGenerator>, service: Arc<dyn ServiceStatus>) -> Self {
        Self { db, keys, service }
    }

    /// Create an interface with its address stacks
    pub fn create_interface(&self, req: &InterfaceRequest) -> Result<WgInterface> {
        let (ipv4, ipv6) = validate_request(req)?;

        let uow = self.db.begin()?;
        if uow.interface_name_taken(&req.name, None)? {
            return Err(Error::DuplicateInterface {
                name: req.name.clone(),
            });
        }

        let private_key = req.private_key.trim();
        let id = uow.insert_interface(&req.name, private_key, req.port)?;
        let ipv4 = uow.set_interface_ipv4(id, ipv4)?;
        let ipv6 = uow.set_interface_ipv6(id, ipv6)?;
        uow.flush()?;

        info!("Created interface {} (id {})", req.name, id);
        Ok(WgInterface {
            id,
            name: req.name.clone(),
            private_key: private_key.to_string(),
            port: req.port,
            ipv4,
            ipv6,
            peers: Vec::new(),
        })
    }

    /// Replace name, key, port and address stacks of an interface.
    /// Each stack is updated in place, created or removed on its own.
    pub fn edit_interface(&self, id: InterfaceId, req: &InterfaceRequest) -> Result<WgInterface> {
        let (ipv4, ipv6) = validate_request(req)?;

        let uow = self.db.begin()?;
        let current = uow
            .find_interface(id)?
            .ok_or_else(|| Error::not_found("interface", id))?;
        if uow.interface_name_taken(&req.name, Some(id))? {
            return Err(Error::DuplicateInterface {
                name: req.name.clone(),
            });
        }

        uow.update_interface(id, &req.name, req.private_key.trim(), req.port)?;
        uow.set_interface_ipv4(id, ipv4)?;
        uow.set_interface_ipv6(id, ipv6)?;

        let updated = uow
            .find_interface(id)?
            .ok_or_else(|| Error::not_found("interface", id))?;
        uow.flush()?;

        if current.name != updated.name {
            info!("Renamed interface {} to {}", current.name, updated.name);
        }
        info!("Updated interface {} (id {})", updated.name, id);
        Ok(updated)
    }

    /// Delete an interface with all of its peers and addresses
    pub fn remove_interface(&self, id: InterfaceId) -> Result<()> {
        let uow = self.db.begin()?;
        if !uow.delete_interface(id)? {
            return Err(Error::not_found("interface", id));
        }
        uow.flush()?;
        info!("Removed interface {}", id);
        Ok(())
    }

    pub fn get_interface(&self, id: InterfaceId) -> Result<WgInterface> {
        self.db
            .begin()?
            .find_interface(id)?
            .ok_or_else(|| Error::not_found("interface", id))
    }

    pub fn get_interface_by_name(&self, name: &str) -> Result<WgInterface> {
        self.db
            .begin()?
            .find_interface_by_name(name)?
            .ok_or_else(|| Error::not_found("interface", name))
    }

    /// Every stored interface with its peers
    pub fn get_all_interfaces(&self) -> Result<Vec<WgInterface>> {
        self.db.begin()?.find_all_interfaces()
    }

    /// Interface plus the public key derived from its private key
    pub fn describe_interface(&self, id: InterfaceId) -> Result<InterfaceDetail> {
        let interface = self.get_interface(id)?;
        let public_key = self.keys.generate_public_key(&interface.private_key)?;
        Ok(InterfaceDetail {
            interface,
            public_key,
        })
    }

    /// Every interface with its stack and service unit status
    pub fn list_interfaces(&self) -> Result<Vec<InterfaceSummary>> {
        let interfaces = self.db.begin()?.find_all_interfaces()?;
        debug!("Listing {} interfaces", interfaces.len());

        Ok(interfaces
            .iter()
            .map(|iface| InterfaceSummary {
                id: iface.id,
                name: iface.name.clone(),
                active: self.service.is_active(&iface.name),
                enabled: self.service.is_enabled(&iface.name),
                stack: Self::get_interface_ip_stack(iface),
            })
            .collect())
    }

    pub fn get_interface_ip_stack(interface: &WgInterface) -> Option<IpStack> {
        interface.ip_stack()
    }
}

/// Check a kernel interface name
pub fn validate_interface_name(name: &str) -> Result<()> {
    let problem = if name.is_empty() {
        Some("must not be empty")
    } else if name.len() > MAX_NAME_LEN {
        Some("must be at most 15 bytes long")
    } else if name == "." || name == ".." {
        Some("must not be a path component")
    } else if name.chars().any(|c| c == '/' || c == ':' || c.is_whitespace()) {
        Some("must not contain '/', ':' or whitespace")
    } else {
        None
    };

    match problem {
        Some(problem) => Err(Error::InvalidConfig(format!(
            "interface name {:?} {}",
            name, problem
        ))),
        None => Ok(()),
    }
}

fn validate_request(req: &InterfaceRequest) -> Result<(Option<Ipv4Network>, Option<Ipv6Network>)> {
    validate_interface_name(&req.name)?;
    validate_key("private key", &req.private_key)?;

    let ipv4 = req.ipv4.as_ref().map(|spec| spec.to_network()).transpose()?;
    let ipv6 = req.ipv6.as_ref().map(|spec| spec.to_network()).transpose()?;
    if IpStack::from_presence(ipv4.is_some(), ipv6.is_some()).is_none() {
        return Err(Error::InvalidConfig(format!(
            "interface {} needs an IPv4 or IPv6 address",
            req.name
        )));
    }
    Ok((ipv4, ipv6))
}
