pub mod config;
mod error;
pub mod inbound;
pub mod logging;
pub mod memory;
pub mod naming;
pub mod session;
pub mod smb;
pub mod transfer;

pub const APP_NAME: &str = "Teleshare";

pub use config::{RemoteShareConfig, Settings, load_settings};
pub use error::{Error, Result};
pub use inbound::{InboundFile, InboundFileKind};
pub use logging::{LogFormat, init_logging};
pub use memory::InMemoryShare;
pub use session::{SessionManager, ShareConnector, ShareSession};
pub use smb::SmbConnector;
pub use transfer::{
    Probe, ProbeFailurePolicy, TransferEngine, TransferOptions, TransferOutcome, TransferRequest,
};
