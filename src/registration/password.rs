use md5::{Digest, Md5};

/// Device account password: `MS` + first six hex digits of `md5(u_sn)` + `!`.
///
/// Devices never store this separately, so the derivation must stay stable.
pub fn derive_password(u_sn: &str) -> String {
    let digest = format!("{:x}", Md5::digest(u_sn.as_bytes()));
    format!("MS{}!", &digest[..6])
}
