use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;

use crate::device::types::DeviceId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to determine path to storage file")]
    NoStoragePath,

    #[error("Failed to acquire file lock on storage file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode storage as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write storage file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build storage file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl StorageError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            StorageError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No peripheral with identity {0} is known to the adapter")]
    UnknownPeripheral(DeviceId),

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Transport operation {operation} took too long")]
    Timeout { operation: &'static str },

    #[error("Transport rejected the request: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("A connection attempt to {0} is already in progress")]
    AlreadyConnecting(DeviceId),

    #[error("The connection attempt to {0} was cancelled")]
    Cancelled(DeviceId),

    #[error("Failed to connect: {source}")]
    Transport { #[from] source: TransportError },
}

#[derive(Error, Debug)]
pub enum DisconnectError {
    #[error("Failed to disconnect: {source}")]
    Transport { #[from] source: TransportError },
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("Device {0} is not connected")]
    NotConnected(DeviceId),

    #[error("Failed to write command: {source}")]
    Transport { #[from] source: TransportError },
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to start/stop scanning: {source}")]
    Transport { #[from] source: TransportError },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (storage): {source}")]
    StorageError { #[from] source: StorageError },

    #[error("Bluetooth is not available: {source}")]
    Transport { #[from] source: TransportError },

    #[error("{source}")]
    Scan { #[from] source: ScanError },

    #[error("{source}")]
    Connect { #[from] source: ConnectError },

    #[error("{source}")]
    Send { #[from] source: SendError },

    #[error("{source}")]
    Disconnect { #[from] source: DisconnectError },

    #[error("Device {0} was not found while scanning")]
    DeviceNotFound(DeviceId),

    #[error("Failed to wait for shutdown signal: {source}")]
    Signal { source: std::io::Error },
}
