//! Shared physical links.
//!
//! Several device sessions may talk over one physical link, e.g. multiple
//! slave ids on one serial line. A [`LinkRegistry`] owns such links by name.
//! [`LinkRegistry::acquire`] opens the link on first use and hands out a
//! [`LinkHandle`]; the link is torn down when the last handle is dropped.
//!
//! Access through a handle is exclusive per link: [`LinkHandle::lock`] waits
//! until no other session is in a send/receive cycle on the same link.
//! Distinct links never block each other.
//!
//! [`SharedTransport`] ties this to the session lifecycle. It is a
//! [`Transport`] that acquires its handle on `connect` and releases it on
//! `disconnect`, so the physical link is closed and torn down when the last
//! session over it disconnects.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use plc_registers::LinkRegistry;
//!
//! # tokio_test_block_on(async {
//! let registry: Arc<LinkRegistry<Vec<u8>>> = Arc::new(LinkRegistry::new());
//!
//! let first = registry.acquire("COM1", || Ok(Vec::new())).unwrap();
//! let second = registry.acquire("COM1", || unreachable!()).unwrap();
//! assert_eq!(registry.holders("COM1"), 2);
//!
//! first.lock().await.push(0x01);
//! assert_eq!(*second.lock().await, [0x01]);
//!
//! drop(first);
//! drop(second);
//! assert!(!registry.contains("COM1"));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::error::{RegisterError, Result};
use crate::transport::Transport;

struct Entry<L> {
    link: Arc<AsyncMutex<L>>,
    holders: usize,
}

/// Registry of named, reference-counted physical links.
pub struct LinkRegistry<L> {
    links: Mutex<HashMap<String, Entry<L>>>,
}

impl<L> Default for LinkRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> std::fmt::Debug for LinkRegistry<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let links = self.links.lock();
        f.debug_map()
            .entries(links.iter().map(|(name, entry)| (name, entry.holders)))
            .finish()
    }
}

impl<L> LinkRegistry<L> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the link called `name`, opening it with `open` if no session
    /// holds it yet.
    ///
    /// # Errors
    ///
    /// Returns the error of `open` if the link has to be opened and opening
    /// fails. Nothing is registered in that case.
    pub fn acquire<F>(self: &Arc<Self>, name: &str, open: F) -> Result<LinkHandle<L>>
    where
        F: FnOnce() -> Result<L>,
    {
        let mut links = self.links.lock();
        let link = match links.get_mut(name) {
            Some(entry) => {
                entry.holders += 1;
                Arc::clone(&entry.link)
            }
            None => {
                let link = Arc::new(AsyncMutex::new(open()?));
                links.insert(
                    name.to_string(),
                    Entry {
                        link: Arc::clone(&link),
                        holders: 1,
                    },
                );
                tracing::info!(link = name, "Opened shared link");
                link
            }
        };
        Ok(LinkHandle {
            registry: Arc::clone(self),
            name: name.to_string(),
            link,
        })
    }

    /// Returns the number of live handles on `name`, 0 if the link is not open.
    pub fn holders(&self, name: &str) -> usize {
        self.links.lock().get(name).map_or(0, |entry| entry.holders)
    }

    /// Returns `true` if the link called `name` is open.
    pub fn contains(&self, name: &str) -> bool {
        self.links.lock().contains_key(name)
    }

    /// Returns the number of open links.
    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    /// Returns `true` if no link is open.
    pub fn is_empty(&self) -> bool {
        self.links.lock().is_empty()
    }

    fn release(&self, name: &str) {
        let mut links = self.links.lock();
        let Some(entry) = links.get_mut(name) else {
            return;
        };
        entry.holders = entry.holders.saturating_sub(1);
        if entry.holders == 0 {
            links.remove(name);
            tracing::info!(link = name, "Tore down shared link");
        }
    }
}

/// A session's hold on a shared link. Dropping it releases the hold.
pub struct LinkHandle<L> {
    registry: Arc<LinkRegistry<L>>,
    name: String,
    link: Arc<AsyncMutex<L>>,
}

impl<L> LinkHandle<L> {
    /// Waits for exclusive access to the link for one send/receive cycle.
    pub async fn lock(&self) -> MutexGuard<'_, L> {
        self.link.lock().await
    }

    /// Returns the name the link is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of live handles on this link, including this one.
    pub fn holders(&self) -> usize {
        self.registry.holders(&self.name)
    }
}

impl<L> std::fmt::Debug for LinkHandle<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<L> Drop for LinkHandle<L> {
    fn drop(&mut self) {
        self.registry.release(&self.name);
    }
}

type Opener<L> = Arc<dyn Fn() -> Result<L> + Send + Sync>;

/// A [`Transport`] for one session on a shared physical link.
///
/// `connect` acquires the link from the registry, opening and connecting the
/// physical transport if this is the first session on it. `disconnect`
/// releases the hold; the last session to disconnect also disconnects the
/// physical transport, and the registry drops it. Every fetch and store runs
/// under [`LinkHandle::lock`], so cycles of sessions sharing the link never
/// interleave.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use plc_registers::{DeviceSession, LinkRegistry, SessionConfig, SharedTransport, Transport};
///
/// # fn run<L: Transport + 'static>(open_com1: fn() -> plc_registers::Result<L>) -> plc_registers::Result<()> {
/// let registry = Arc::new(LinkRegistry::new());
/// let pump = SharedTransport::new(Arc::clone(&registry), "COM1", "1", open_com1);
/// let valve = SharedTransport::new(Arc::clone(&registry), "COM1", "2", open_com1);
///
/// let pump: DeviceSession<_> = DeviceSession::modbus(SessionConfig::new("pump"), pump, Vec::new())?;
/// let valve: DeviceSession<_> = DeviceSession::modbus(SessionConfig::new("valve"), valve, Vec::new())?;
/// # let _ = (pump, valve);
/// # Ok(())
/// # }
/// ```
pub struct SharedTransport<L> {
    registry: Arc<LinkRegistry<L>>,
    name: String,
    station: String,
    open: Opener<L>,
    handle: Option<LinkHandle<L>>,
}

impl<L> SharedTransport<L> {
    /// Creates a transport for `station` on the link called `name`.
    ///
    /// `open` builds the physical transport when no session holds the link.
    pub fn new<F>(
        registry: Arc<LinkRegistry<L>>,
        name: impl Into<String>,
        station: impl Into<String>,
        open: F,
    ) -> Self
    where
        F: Fn() -> Result<L> + Send + Sync + 'static,
    {
        Self {
            registry,
            name: name.into(),
            station: station.into(),
            open: Arc::new(open),
            handle: None,
        }
    }

    /// Returns the name of the shared link.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the station identity of this session on the link.
    pub fn station(&self) -> &str {
        &self.station
    }

    fn attached(&self, address: &str) -> Result<&LinkHandle<L>> {
        self.handle
            .as_ref()
            .ok_or_else(|| RegisterError::transport(address, "shared link not acquired"))
    }
}

impl<L> std::fmt::Debug for SharedTransport<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTransport")
            .field("name", &self.name)
            .field("station", &self.station)
            .field("attached", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<L: Transport + 'static> Transport for SharedTransport<L> {
    async fn connect(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let handle = self.registry.acquire(&self.name, || (self.open)())?;
        {
            let mut link = handle.lock().await;
            if !link.is_connected() {
                // On failure the handle drops here and releases the hold.
                link.connect().await?;
            }
        }
        tracing::debug!(link = %self.name, station = %self.station, "Attached to shared link");
        self.handle = Some(handle);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        // The hold is released under the cycle lock, so two sessions leaving
        // together cannot both count the other as still attached.
        let mut link = Arc::clone(&handle.link).lock_owned().await;
        let outcome = if handle.holders() == 1 && link.is_connected() {
            link.disconnect().await
        } else {
            Ok(())
        };
        drop(handle);
        drop(link);
        tracing::debug!(link = %self.name, station = %self.station, "Detached from shared link");
        outcome
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    async fn fetch(&mut self, address: &str, byte_count: usize) -> Result<Vec<u8>> {
        let handle = self.attached(address)?;
        let mut link = handle.lock().await;
        link.fetch(address, byte_count).await
    }

    async fn store(&mut self, address: &str, payload: &[u8]) -> Result<()> {
        let handle = self.attached(address)?;
        let mut link = handle.lock().await;
        link.store(address, payload).await
    }

    fn connection_token(&self) -> String {
        format!("{}#{}", self.name, self.station)
    }
}
