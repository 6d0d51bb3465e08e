//! Bitmap IP address management.
//!
//! The allocation table is one JSON object mapping a normalised subnet
//! (`192.168.50.0/24`) to a string of `'0'`/`'1'` characters, one per
//! address of the block. Character `i` stands for the address
//! `network + 1 + i`: the network address itself is never handed out, and
//! neither is the broadcast address, so a `/30` yields exactly two hosts.
//!
//! Every allocation or release loads the table, mutates it and writes it
//! back while holding an exclusive `flock` on a sibling lock file, so
//! concurrent `corral` invocations cannot lose each other's updates.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use ipnetwork::Ipv4Network;
use nix::fcntl::{Flock, FlockArg};

use corral_common::error::{CorralError, Result};

/// Longest prefix that still leaves a usable host address.
const MAX_PREFIX: u8 = 30;
/// Shortest prefix accepted; keeps the bitmap at most 16 MiB.
const MIN_PREFIX: u8 = 8;

/// Subnet key to allocation bitmap.
type SubnetTable = BTreeMap<String, String>;

/// File-backed address allocator.
#[derive(Debug, Clone)]
pub struct Ipam {
    path: PathBuf,
}

impl Ipam {
    /// Creates an allocator persisting its table at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the allocation table.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hands out the lowest free host address of `subnet`.
    ///
    /// `subnet` may carry any host part; only its network is used.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Exhausted`] when every host address is taken,
    /// [`CorralError::Config`] for unsupported prefix lengths, or an I/O
    /// error from the table.
    pub fn allocate(&self, subnet: Ipv4Network) -> Result<Ipv4Addr> {
        let block = Block::new(subnet)?;
        self.with_table(|table| {
            let bitmap = table
                .entry(block.key())
                .or_insert_with(|| "0".repeat(block.len()));
            block.check(bitmap)?;
            let index = bitmap
                .bytes()
                .take(block.usable())
                .position(|b| b == b'0')
                .ok_or_else(|| CorralError::Exhausted { subnet: block.key() })?;
            bitmap.replace_range(index..=index, "1");
            let ip = block.address(index);
            tracing::debug!(subnet = %block.key(), %ip, "address allocated");
            Ok(ip)
        })
    }

    /// Returns `ip` to the free pool of `subnet`.
    ///
    /// Releasing an address that is already free is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Config`] if `ip` is not a host address of
    /// `subnet`, or an I/O error from the table.
    pub fn release(&self, subnet: Ipv4Network, ip: Ipv4Addr) -> Result<()> {
        let block = Block::new(subnet)?;
        let index = block.index_of(ip)?;
        self.with_table(|table| {
            if let Some(bitmap) = table.get_mut(&block.key()) {
                block.check(bitmap)?;
                bitmap.replace_range(index..=index, "0");
            }
            tracing::debug!(subnet = %block.key(), %ip, "address released");
            Ok(())
        })
    }

    /// Runs `f` on the table under the lock and persists the result.
    fn with_table<T>(&self, f: impl FnOnce(&mut SubnetTable) -> Result<T>) -> Result<T> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| CorralError::io(dir, e))?;
        }
        let _lock = self.lock()?;
        let mut table = self.load()?;
        let value = f(&mut table)?;
        self.dump(&table)?;
        Ok(value)
    }

    fn lock(&self) -> Result<Flock<File>> {
        let lock_path = self.path.with_extension("json.lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| CorralError::io(&lock_path, e))?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, e)| CorralError::syscall("lock IPAM table", e))
    }

    fn load(&self) -> Result<SubnetTable> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(SubnetTable::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SubnetTable::new()),
            Err(e) => Err(CorralError::io(&self.path, e)),
        }
    }

    fn dump(&self, table: &SubnetTable) -> Result<()> {
        let json = serde_json::to_vec(table)?;
        std::fs::write(&self.path, json).map_err(|e| CorralError::io(&self.path, e))
    }
}

/// A validated, normalised IPv4 block.
struct Block {
    network: Ipv4Network,
}

impl Block {
    fn new(subnet: Ipv4Network) -> Result<Self> {
        let prefix = subnet.prefix();
        if !(MIN_PREFIX..=MAX_PREFIX).contains(&prefix) {
            return Err(CorralError::Config {
                message: format!(
                    "subnet {subnet} must have a prefix between /{MIN_PREFIX} and /{MAX_PREFIX}"
                ),
            });
        }
        let network = Ipv4Network::new(subnet.network(), prefix).map_err(|e| {
            CorralError::Config {
                message: format!("invalid subnet {subnet}: {e}"),
            }
        })?;
        Ok(Self { network })
    }

    fn key(&self) -> String {
        self.network.to_string()
    }

    /// Bitmap length: every address of the block.
    fn len(&self) -> usize {
        1 << (32 - u32::from(self.network.prefix()))
    }

    /// Addresses strictly between the network and broadcast addresses.
    fn usable(&self) -> usize {
        self.len() - 2
    }

    /// Rejects a stored bitmap that does not describe this block.
    fn check(&self, bitmap: &str) -> Result<()> {
        if bitmap.len() == self.len() && bitmap.bytes().all(|b| matches!(b, b'0' | b'1')) {
            return Ok(());
        }
        Err(CorralError::Config {
            message: format!(
                "corrupt allocation bitmap for {}: expected {} characters of 0 or 1",
                self.key(),
                self.len()
            ),
        })
    }

    fn address(&self, index: usize) -> Ipv4Addr {
        let offset = u32::try_from(index).unwrap_or(u32::MAX);
        Ipv4Addr::from(u32::from(self.network.network()) + 1 + offset)
    }

    fn index_of(&self, ip: Ipv4Addr) -> Result<usize> {
        let base = u32::from(self.network.network());
        let raw = u32::from(ip);
        let index = raw
            .checked_sub(base + 1)
            .and_then(|i| usize::try_from(i).ok())
            .filter(|i| *i < self.usable())
            .ok_or_else(|| CorralError::Config {
                message: format!("{ip} is not a host address of {}", self.key()),
            })?;
        Ok(index)
    }
}
