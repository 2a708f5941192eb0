//! Password command implementation

use anyhow::{Result, bail};

use crate::registration::derive_password;

pub async fn execute_password_command(u_sn: &str) -> Result<()> {
    if u_sn.trim().is_empty() {
        bail!("unit serial number must not be empty");
    }
    println!("{}", derive_password(u_sn.trim()));
    Ok(())
}
