//! The interop facade
//!
//! [`Interop`] owns one instance of every registry. Tests build as many isolated
//! instances as they like; bindings that need a process-wide instance use
//! [`global`].

use std::path::Path;
use std::sync::OnceLock;

use tether_config::{ConfigLoader, InteropConfig};
use tracing::{trace, warn};

use crate::error::{InteropError, Result};
use crate::handle::Handle;
use crate::memory::sharded::ShardedMap;
use crate::memory::{AllocationRegistry, AllocatorStrategy, RawView, ReleaseFn};
use crate::thunk::NativeStub;
use crate::wait::EventBridge;

/// Resolved runtime settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Allocator backing every block
    pub allocator: AllocatorStrategy,
    /// Lock shards per registry
    pub shards: usize,
    /// Reject stubs whose convention differs from the callback's declaration
    pub enforce_conventions: bool,
    /// Live events allowed at once
    pub max_events: usize,
    /// Handles accepted by one multi-object wait
    pub max_wait_handles: usize,
    /// Default log filter for [`logging::init`](crate::logging::init)
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allocator: AllocatorStrategy::System,
            shards: tether_config::interop::DEFAULT_SHARDS,
            enforce_conventions: true,
            max_events: tether_config::interop::DEFAULT_MAX_EVENTS,
            max_wait_handles: tether_config::interop::DEFAULT_MAX_WAIT_HANDLES,
            log_level: tether_config::interop::DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Settings {
    /// Resolve a validated configuration
    pub fn from_config(config: &InteropConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            allocator: config.allocator_strategy().parse()?,
            shards: config.shards(),
            enforce_conventions: config.enforce_conventions(),
            max_events: config.max_events(),
            max_wait_handles: config.max_wait_handles(),
            log_level: config.log_level().to_string(),
        })
    }
}

/// Native memory, string, thunk and event state for one interop domain
pub struct Interop {
    settings: Settings,
    pub(crate) blocks: AllocationRegistry,
    pub(crate) arrays: ShardedMap<usize>,
    pub(crate) pins: ShardedMap<Box<NativeStub>>,
    pub(crate) events: EventBridge,
}

impl Interop {
    pub fn new(settings: Settings) -> Self {
        Self {
            blocks: AllocationRegistry::new(settings.allocator, settings.shards),
            arrays: ShardedMap::new(settings.shards),
            pins: ShardedMap::new(settings.shards),
            events: EventBridge::new(settings.max_events, settings.max_wait_handles),
            settings,
        }
    }

    /// Build from a parsed configuration file
    pub fn from_config(config: &InteropConfig) -> Result<Self> {
        Ok(Self::new(Settings::from_config(config)?))
    }

    /// Build from `tether.toml` (searched upward from `dir`), the global config and
    /// the environment
    pub fn load(dir: &Path) -> Result<Self> {
        let config = ConfigLoader::new().load_from_directory(dir)?;
        Self::from_config(&config.interop)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Allocate `length` zero-initialised bytes
    pub fn allocate(&self, length: usize) -> Result<Handle> {
        self.blocks.allocate(length)
    }

    /// Track a caller-supplied address so `free` releases it through `release`
    pub fn adopt(
        &self,
        address: Handle,
        length: usize,
        release: Option<ReleaseFn>,
    ) -> Result<Handle> {
        self.blocks.adopt(address, length, release)
    }

    /// Release `handle`. Returns `false` when nothing was registered under it.
    ///
    /// A pinned stub at this address is released first. A block at the same address
    /// is then released as well; string arrays free their elements before the table.
    pub fn free(&self, handle: Handle) -> bool {
        if handle.is_null() {
            return false;
        }
        let pin_released = self.release_pin(handle);
        let block_released = self.release_block(handle);
        if !pin_released && !block_released {
            trace!(%handle, "free of unknown handle");
        }
        pin_released || block_released
    }

    fn release_block(&self, handle: Handle) -> bool {
        let Some(info) = self.blocks.claim(handle) else {
            return false;
        };

        if let Some(count) = self.arrays.remove(handle.addr()) {
            // Read the whole table before any element or the table itself goes away.
            let elements: Vec<usize> = match unsafe { RawView::new(handle, info.len) } {
                Some(view) => (0..count).map(|i| view.read_slot(i)).collect(),
                None => Vec::new(),
            };
            for element in elements.into_iter().filter(|&e| e != 0) {
                if !self.free(Handle::from_addr(element)) {
                    warn!(
                        array = %handle,
                        element = %Handle::from_addr(element),
                        "array element was not a live block"
                    );
                }
            }
        }

        unsafe { self.blocks.dispose(handle, info) };
        true
    }

    /// Whether `handle` is a live block
    pub fn is_allocated(&self, handle: Handle) -> bool {
        self.blocks.contains(handle)
    }

    /// Usable length of a live block
    pub fn block_len(&self, handle: Handle) -> Option<usize> {
        self.blocks.info(handle).map(|info| info.len)
    }

    /// Number of live blocks
    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Whether `handle` is a live string array
    pub fn is_string_array(&self, handle: Handle) -> bool {
        self.arrays.contains(handle.addr())
    }

    /// Number of live string arrays
    pub fn live_arrays(&self) -> usize {
        self.arrays.len()
    }

    /// Copy bytes out of a live block
    pub fn read_block(&self, handle: Handle) -> Option<Vec<u8>> {
        let len = self.block_len(handle)?;
        let view = unsafe { RawView::new(handle, len) }?;
        Some(view.as_slice().to_vec())
    }

    /// Copy `bytes` into a live block at `offset`
    pub fn write_block(&self, handle: Handle, offset: usize, bytes: &[u8]) -> Result<()> {
        let len = self.block_len(handle).ok_or_else(|| {
            InteropError::invalid_operation(format!("{} is not a live block", handle))
        })?;
        if offset.checked_add(bytes.len()).map_or(true, |end| end > len) {
            return Err(InteropError::invalid_operation(format!(
                "write of {} bytes at offset {} exceeds block of {} bytes",
                bytes.len(),
                offset,
                len
            )));
        }
        if let Some(mut view) = unsafe { RawView::new(handle, len) } {
            view.write_bytes(offset, bytes);
        }
        Ok(())
    }
}

impl Default for Interop {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl std::fmt::Debug for Interop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interop")
            .field("settings", &self.settings)
            .field("blocks", &self.blocks)
            .field("arrays", &self.arrays.len())
            .field("pins", &self.pins.len())
            .field("events", &self.events)
            .finish()
    }
}

static GLOBAL: OnceLock<Interop> = OnceLock::new();

/// The process-wide instance, configured from the environment on first use
pub fn global() -> &'static Interop {
    GLOBAL.get_or_init(|| {
        let settings = ConfigLoader::new()
            .load_from_env()
            .map_err(InteropError::from)
            .and_then(|config| Settings::from_config(&config.interop))
            .unwrap_or_else(|err| {
                warn!(error = %err, "invalid interop environment configuration; using defaults");
                Settings::default()
            });
        Interop::new(settings)
    })
}

/// Install the process-wide instance. Returns `false` if it already exists.
pub fn init_global(settings: Settings) -> bool {
    let mut installed = false;
    GLOBAL.get_or_init(|| {
        installed = true;
        Interop::new(settings)
    });
    installed
}
