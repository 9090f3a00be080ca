//! Mount helper.

use super::BlockvFs;
use fuser::{Config, MountOption, SessionACL};
use std::path::Path;
use tracing::{debug, info};

/// Mount an empty block-device filesystem at `mountpoint` and run it until
/// unmount.
///
/// `allow_root` maps to the corresponding FUSE mount option so root can
/// reach the devices (needed for `mount -o loop`).
pub fn mount<P: AsRef<Path>>(mountpoint: P, allow_root: bool) -> anyhow::Result<()> {
    let mut config = Config::default();
    config.mount_options = vec![MountOption::FSName("blockv".to_string())];
    if allow_root {
        config.acl = SessionACL::RootAndOwner;
    }

    let fs = BlockvFs::new();
    let session = fuser::Session::new(fs, mountpoint.as_ref(), &config)?;
    info!(target: "blockv::fs", mountpoint = ?mountpoint.as_ref(), "mounted");

    session.run()?;
    debug!(target: "blockv::fs", "FUSE session exited");
    Ok(())
}
