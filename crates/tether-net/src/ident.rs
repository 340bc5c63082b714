//! Platform identity for the handshake body.

/// Free-form platform fields carried in the handshake. Purely diagnostic;
/// the remote side only logs them.
#[derive(Debug, Clone)]
pub struct PlatformIdent {
    pub platform_name: String,
    pub node_name: String,
    pub platform_version: String,
}

/// Wire strings carry a one byte length prefix.
fn clamp(mut s: String) -> String {
    if s.len() > 255 {
        let mut end = 255;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

#[cfg(unix)]
fn query() -> Option<PlatformIdent> {
    fn field(raw: &[libc::c_char]) -> String {
        let bytes: Vec<u8> =
            raw.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&raw mut uts) } != 0 {
        return None;
    }
    Some(PlatformIdent {
        platform_name: field(&uts.sysname),
        node_name: field(&uts.nodename),
        platform_version: format!(
            "{} {} ({})",
            field(&uts.version),
            field(&uts.release),
            field(&uts.machine)
        ),
    })
}

#[cfg(not(unix))]
fn query() -> Option<PlatformIdent> {
    None
}

pub fn platform_ident() -> PlatformIdent {
    let ident = query().unwrap_or_else(|| PlatformIdent {
        platform_name: std::env::consts::OS.to_string(),
        node_name: "unknown".to_string(),
        platform_version: std::env::consts::ARCH.to_string(),
    });
    PlatformIdent {
        platform_name: clamp(ident.platform_name),
        node_name: clamp(ident.node_name),
        platform_version: clamp(ident.platform_version),
    }
}
