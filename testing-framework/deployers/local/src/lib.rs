mod launcher;
mod process;
mod wallet;

pub use launcher::{LocalLauncher, NODE_BINARY_NAME};
pub use process::LocalProcess;
pub use wallet::{WALLET_BINARY_NAME, WalletHandle, WalletHandleError};
