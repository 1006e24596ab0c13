//! Blocking library surface with sentinel returns
//!
//! Every function runs to completion on a shared runtime and reports
//! failure as `None`, `-1` or `false`. The reason is kept per thread and
//! read back with [`last_error`]. Objects are referred to by typed handles
//! into a process-wide registry.
//!
//! These functions block the calling thread and must not be called from
//! inside an async task.

use crate::config::{ClientConfig, HostSetConfig, StoreConfig};
use crate::file::{FileReader, FileWriter};
use crate::fs::FileSystem;
use crate::hostset::HostSet;
use parking_lot::Mutex;
use renterfs_core::contract::Contract;
use renterfs_core::error::{RenterError, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Runtime;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Message of the most recent failure on this thread
///
/// Successful calls leave it untouched.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

fn record_error(op: &str, err: &RenterError) {
    tracing::debug!(op, error = %err, "Library call failed");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(format!("{}: {}", op, err)));
}

fn report<T>(op: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            record_error(op, &e);
            None
        }
    }
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn runtime() -> Result<&'static Runtime> {
    if let Some(rt) = RUNTIME.get() {
        return Ok(rt);
    }
    let rt = tokio::runtime::Builder::new_multi_thread()
        .thread_name("renterfs-io")
        .enable_all()
        .build()?;
    Ok(RUNTIME.get_or_init(|| rt))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostSetHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(u64);

/// Origin for [`seek_file`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

enum OpenFile {
    Writer(FileWriter),
    Reader(FileReader),
}

/// `None` once the handle has been closed
type FileSlot = Arc<Mutex<Option<OpenFile>>>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    host_sets: Mutex<HashMap<u64, Arc<HostSet>>>,
    stores: Mutex<HashMap<u64, FileSystem>>,
    files: Mutex<HashMap<u64, FileSlot>>,
}

impl Registry {
    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn host_set(&self, handle: HostSetHandle) -> Result<Arc<HostSet>> {
        self.host_sets
            .lock()
            .get(&handle.0)
            .cloned()
            .ok_or(RenterError::HandleClosed)
    }

    fn store(&self, handle: StoreHandle) -> Result<FileSystem> {
        self.stores
            .lock()
            .get(&handle.0)
            .cloned()
            .ok_or(RenterError::HandleClosed)
    }

    fn file(&self, handle: FileHandle) -> Result<FileSlot> {
        self.files
            .lock()
            .get(&handle.0)
            .cloned()
            .ok_or(RenterError::HandleClosed)
    }

    fn insert_file(&self, file: OpenFile) -> FileHandle {
        let id = self.next();
        self.files.lock().insert(id, Arc::new(Mutex::new(Some(file))));
        FileHandle(id)
    }
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::default)
}

/// Parse a 96-byte contract
pub fn init_contract(bytes: &[u8]) -> Option<Contract> {
    report("init_contract", Contract::parse(bytes))
}

/// Open a host set with configuration from the environment
pub fn open_host_set(shard_addr: &str) -> Option<HostSetHandle> {
    open_host_set_with(shard_addr, ClientConfig::from_env().host_set)
}

pub fn open_host_set_with(shard_addr: &str, config: HostSetConfig) -> Option<HostSetHandle> {
    let result = runtime().and_then(|rt| rt.block_on(HostSet::open(shard_addr, config)));
    let hs = report("open_host_set", result)?;
    let id = registry().next();
    registry().host_sets.lock().insert(id, Arc::new(hs));
    Some(HostSetHandle(id))
}

pub fn add_host(hs: HostSetHandle, contract: Contract) -> bool {
    let result = registry()
        .host_set(hs)
        .and_then(|set| runtime().and_then(|rt| rt.block_on(set.add_contract(contract))));
    report("add_host", result).is_some()
}

/// Close every session of the host set and invalidate the handle
///
/// Stores opened on the set stay registered but can no longer place data.
pub fn close_host_set(hs: HostSetHandle) -> bool {
    let taken = registry().host_sets.lock().remove(&hs.0);
    let result = taken
        .ok_or(RenterError::HandleClosed)
        .and_then(|set| runtime().and_then(|rt| rt.block_on(set.close())));
    report("close_host_set", result).is_some()
}

/// Open a file store with configuration from the environment
pub fn open_store(root: impl AsRef<Path>, hs: HostSetHandle) -> Option<StoreHandle> {
    open_store_with(root, hs, ClientConfig::from_env().store)
}

pub fn open_store_with(
    root: impl AsRef<Path>,
    hs: HostSetHandle,
    config: StoreConfig,
) -> Option<StoreHandle> {
    let result = registry()
        .host_set(hs)
        .and_then(|set| FileSystem::open(root, set, config));
    let fs = report("open_store", result)?;
    let id = registry().next();
    registry().stores.lock().insert(id, fs);
    Some(StoreHandle(id))
}

pub fn create_file(store: StoreHandle, name: &str, min_hosts: usize) -> Option<FileHandle> {
    let result = registry().store(store).and_then(|fs| {
        runtime().and_then(|rt| rt.block_on(fs.create(name, min_hosts)))
    });
    let writer = report("create_file", result)?;
    Some(registry().insert_file(OpenFile::Writer(writer)))
}

pub fn open_file(store: StoreHandle, name: &str) -> Option<FileHandle> {
    let result = registry()
        .store(store)
        .and_then(|fs| runtime().and_then(|rt| rt.block_on(fs.open_file(name))));
    let reader = report("open_file", result)?;
    Some(registry().insert_file(OpenFile::Reader(reader)))
}

/// Append `data`; returns the number of bytes written or -1
pub fn write_file(f: FileHandle, data: &[u8]) -> isize {
    let result = registry().file(f).and_then(|slot| {
        let mut guard = slot.lock();
        let written = match guard.as_mut() {
            Some(OpenFile::Writer(writer)) => runtime()?.block_on(writer.write(data)),
            Some(OpenFile::Reader(_)) => Err(RenterError::Internal(
                "file was opened for reading".to_string(),
            )),
            None => Err(RenterError::HandleClosed),
        };
        written
    });
    report("write_file", result).map_or(-1, |n| n as isize)
}

/// Read into `buf`; returns the number of bytes read, 0 at EOF, or -1
pub fn read_file(f: FileHandle, buf: &mut [u8]) -> isize {
    let result = registry().file(f).and_then(|slot| {
        let mut guard = slot.lock();
        let read = match guard.as_mut() {
            Some(OpenFile::Reader(reader)) => runtime()?.block_on(reader.read(buf)),
            Some(OpenFile::Writer(_)) => Err(RenterError::Internal(
                "file was opened for writing".to_string(),
            )),
            None => Err(RenterError::HandleClosed),
        };
        read
    });
    report("read_file", result).map_or(-1, |n| n as isize)
}

/// Move the read position; returns the new position or -1
pub fn seek_file(f: FileHandle, offset: i64, whence: Whence) -> i64 {
    let result = registry().file(f).and_then(|slot| {
        let mut guard = slot.lock();
        let pos = match whence {
            Whence::Set => u64::try_from(offset)
                .map(SeekFrom::Start)
                .map_err(|_| RenterError::InvalidSeek(format!("negative offset {}", offset)))?,
            Whence::Cur => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        let moved = match guard.as_mut() {
            Some(OpenFile::Reader(reader)) => reader.seek(pos),
            Some(OpenFile::Writer(_)) => Err(RenterError::InvalidSeek(
                "write handles are append-only".to_string(),
            )),
            None => Err(RenterError::HandleClosed),
        };
        moved
    });
    report("seek_file", result)
        .and_then(|pos| i64::try_from(pos).ok())
        .unwrap_or(-1)
}

/// Close a file handle; a write handle commits its file
///
/// A write handle whose writes all failed before storing anything commits
/// nothing and returns `false`. Closing an already closed handle fails
/// without touching stored data.
pub fn close_file(f: FileHandle) -> bool {
    let slot = registry().files.lock().remove(&f.0);
    let taken = slot.and_then(|slot| {
        let file = slot.lock().take();
        file
    });
    let result = match taken {
        Some(OpenFile::Writer(writer)) => runtime().and_then(|rt| rt.block_on(writer.close())),
        Some(OpenFile::Reader(reader)) => {
            reader.close();
            Ok(())
        }
        None => Err(RenterError::HandleClosed),
    };
    report("close_file", result).is_some()
}

/// Close a store; its host set stays open
pub fn close_store(store: StoreHandle) -> bool {
    let taken = registry().stores.lock().remove(&store.0);
    let result = taken
        .ok_or(RenterError::HandleClosed)
        .and_then(FileSystem::close);
    report("close_store", result).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_error_is_per_thread() {
        assert!(init_contract(&[0u8; 10]).is_none());
        let here = last_error().unwrap();
        assert!(here.starts_with("init_contract: "));

        let there = std::thread::spawn(last_error).join().unwrap();
        assert!(there.is_none());
    }

    #[test]
    fn test_success_keeps_last_error() {
        assert!(!close_file(FileHandle(u64::MAX)));
        let before = last_error().unwrap();
        assert!(before.contains("close_file"));

        let mut bytes = vec![0u8; 96];
        let host = ed25519_dalek::SigningKey::from_bytes(&[9u8; 32]);
        bytes[..32].copy_from_slice(host.verifying_key().as_bytes());
        bytes[32..64].fill(1);
        bytes[64..].fill(2);
        assert!(init_contract(&bytes).is_some());
        assert_eq!(last_error().unwrap(), before);
    }

    #[test]
    fn test_unknown_handles_rejected() {
        assert_eq!(write_file(FileHandle(u64::MAX), b"data"), -1);
        assert_eq!(read_file(FileHandle(u64::MAX), &mut [0u8; 4]), -1);
        assert_eq!(seek_file(FileHandle(u64::MAX), 0, Whence::Set), -1);
        assert!(!close_store(StoreHandle(u64::MAX)));
        assert!(!close_host_set(HostSetHandle(u64::MAX)));
        assert!(last_error().unwrap().contains("Handle already closed"));
    }

    #[test]
    fn test_unreachable_shard() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        assert!(open_host_set(&addr).is_none());
        assert!(last_error().unwrap().starts_with("open_host_set: "));
    }
}
