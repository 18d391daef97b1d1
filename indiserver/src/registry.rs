//! Connection tables owned by the broker task.
//!
//! Clients live in a slot table that never shrinks: a closed client leaves
//! its slot free and the next accepted client takes the first free slot
//! found by linear scan, growing the table only when none is free. Handles
//! carry the slot's generation, so a handle kept across a disconnect is
//! rejected instead of silently aliasing the slot's new occupant.

use std::fmt;

use crate::client::ClientConnection;
use crate::driver::DriverConnection;
use crate::error::RegistryError;
use crate::observer::ObserverRegistry;

/// Opaque handle to a client slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId {
    slot: u32,
    generation: u32,
}

impl ClientId {
    pub fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Client {}", self.slot)
    }
}

/// Opaque handle to a driver, stable across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverId(usize);

impl DriverId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Driver {}", self.0)
    }
}

#[derive(Debug)]
struct ClientSlot {
    generation: u32,
    client: Option<ClientConnection>,
}

/// All connections known to one broker.
#[derive(Debug, Default)]
pub struct Registry {
    clients: Vec<ClientSlot>,
    drivers: Vec<DriverConnection>,
    observers: ObserverRegistry,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a client in the first free slot, growing the table if needed.
    pub fn add_client(&mut self, client: ClientConnection) -> ClientId {
        if let Some(index) = self.clients.iter().position(|s| s.client.is_none()) {
            let slot = &mut self.clients[index];
            slot.generation = slot.generation.wrapping_add(1);
            slot.client = Some(client);
            return ClientId::new(index as u32, slot.generation);
        }

        self.clients.push(ClientSlot {
            generation: 0,
            client: Some(client),
        });
        ClientId::new((self.clients.len() - 1) as u32, 0)
    }

    pub fn client(&self, id: ClientId) -> Result<&ClientConnection, RegistryError> {
        self.clients
            .get(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.client.as_ref())
            .ok_or(RegistryError::StaleClient(id))
    }

    pub fn client_mut(&mut self, id: ClientId) -> Result<&mut ClientConnection, RegistryError> {
        self.clients
            .get_mut(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.client.as_mut())
            .ok_or(RegistryError::StaleClient(id))
    }

    /// Close a client and free its slot. Returns messages released from its queue.
    pub fn remove_client(&mut self, id: ClientId) -> Result<usize, RegistryError> {
        let slot = self
            .clients
            .get_mut(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .ok_or(RegistryError::StaleClient(id))?;
        let mut client = slot.client.take().ok_or(RegistryError::StaleClient(id))?;
        Ok(client.shutdown())
    }

    /// Active clients in slot order.
    pub fn clients(&self) -> impl Iterator<Item = (ClientId, &ClientConnection)> {
        self.clients.iter().enumerate().filter_map(|(index, slot)| {
            slot.client
                .as_ref()
                .map(|client| (ClientId::new(index as u32, slot.generation), client))
        })
    }

    pub fn active_clients(&self) -> usize {
        self.clients.iter().filter(|s| s.client.is_some()).count()
    }

    /// Slots ever allocated, free or not.
    pub fn client_slots(&self) -> usize {
        self.clients.len()
    }

    pub fn add_driver(&mut self, driver: DriverConnection) -> DriverId {
        self.drivers.push(driver);
        DriverId::new(self.drivers.len() - 1)
    }

    pub fn driver(&self, id: DriverId) -> Result<&DriverConnection, RegistryError> {
        self.drivers
            .get(id.0)
            .ok_or(RegistryError::UnknownDriver(id))
    }

    pub fn driver_mut(&mut self, id: DriverId) -> Result<&mut DriverConnection, RegistryError> {
        self.drivers
            .get_mut(id.0)
            .ok_or(RegistryError::UnknownDriver(id))
    }

    /// Drivers in command-line order.
    pub fn drivers(&self) -> impl Iterator<Item = (DriverId, &DriverConnection)> {
        self.drivers
            .iter()
            .enumerate()
            .map(|(index, driver)| (DriverId::new(index), driver))
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    /// Driver that owns `device`, if any has learned it.
    pub fn driver_for_device(&self, device: &str) -> Option<DriverId> {
        self.drivers()
            .find(|(_, d)| d.device() == Some(device))
            .map(|(id, _)| id)
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    pub fn observers_mut(&mut self) -> &mut ObserverRegistry {
        &mut self.observers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverSpec;

    #[test]
    fn test_client_slots_are_reused_first_free() {
        let mut registry = Registry::new();
        let a = registry.add_client(ClientConnection::new(None));
        let b = registry.add_client(ClientConnection::new(None));
        let c = registry.add_client(ClientConnection::new(None));
        assert_eq!((a.slot(), b.slot(), c.slot()), (0, 1, 2));

        registry.remove_client(a).unwrap();
        registry.remove_client(b).unwrap();
        assert_eq!(registry.active_clients(), 1);

        let d = registry.add_client(ClientConnection::new(None));
        assert_eq!(d.slot(), 0);
        assert_eq!(d.generation(), 1);
        let e = registry.add_client(ClientConnection::new(None));
        assert_eq!(e.slot(), 1);

        let f = registry.add_client(ClientConnection::new(None));
        assert_eq!(f.slot(), 3);
        assert_eq!(registry.client_slots(), 4);
    }

    #[test]
    fn test_stale_client_handle_is_rejected() {
        let mut registry = Registry::new();
        let old = registry.add_client(ClientConnection::new(None));
        registry.remove_client(old).unwrap();
        let new = registry.add_client(ClientConnection::new(None));

        assert_eq!(old.slot(), new.slot());
        assert!(registry.client(new).is_ok());
        assert_eq!(
            registry.client(old).unwrap_err(),
            RegistryError::StaleClient(old)
        );
        assert_eq!(
            registry.remove_client(old).unwrap_err(),
            RegistryError::StaleClient(old)
        );
        assert!(registry.client(new).is_ok());
    }

    #[test]
    fn test_double_remove_is_an_error() {
        let mut registry = Registry::new();
        let id = registry.add_client(ClientConnection::new(None));
        assert!(registry.remove_client(id).is_ok());
        assert!(registry.remove_client(id).is_err());
        assert!(registry.client_mut(id).is_err());
    }

    #[test]
    fn test_clients_iterates_active_only() {
        let mut registry = Registry::new();
        let a = registry.add_client(ClientConnection::new(None));
        let b = registry.add_client(ClientConnection::new(None));
        registry.remove_client(a).unwrap();

        let ids: Vec<_> = registry.clients().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![b]);
    }

    #[test]
    fn test_driver_lookup() {
        let mut registry = Registry::new();
        let ccd = registry.add_driver(DriverConnection::new(DriverSpec::Local {
            program: "indi_simulator_ccd".to_string(),
        }));
        let mount = registry.add_driver(DriverConnection::new("Mount@obs".parse().unwrap()));

        assert_eq!(registry.driver_count(), 2);
        assert_eq!(registry.driver_for_device("Mount"), Some(mount));
        assert_eq!(registry.driver_for_device("CCD Simulator"), None);

        registry.driver_mut(ccd).unwrap().learn_device("CCD Simulator");
        assert_eq!(registry.driver_for_device("CCD Simulator"), Some(ccd));

        let missing = DriverId::new(7);
        assert_eq!(
            registry.driver(missing).unwrap_err(),
            RegistryError::UnknownDriver(missing)
        );
    }
}
