//! Local address discovery for the broadcast listener.

use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr};
use strum::Display;

use super::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InterfaceKind {
    Wired,
    Wireless,
    Virtual,
    Loopback,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceAddress {
    pub name: String,
    pub address: Ipv4Addr,
    pub up: bool,
    pub kind: InterfaceKind,
}

fn is_virtual_interface(lower: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "docker", "veth", "br-", "virbr", "vboxnet", "vmnet", "tun", "tap", "zt", "tailscale",
        "wg", "lxc", "cni", "flannel",
    ];
    PREFIXES.iter().any(|p| lower.starts_with(p))
        || lower.contains("hyper")
        || lower.contains("virtual")
}

fn is_wireless_name(lower: &str) -> bool {
    // ralink drivers name their devices ra0, ra1, ...
    let ralink = lower
        .strip_prefix("ra")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
    ralink
        || ["wl", "ath", "wifi", "wi-fi", "wireless"]
            .iter()
            .any(|p| lower.starts_with(p))
}

/// Classify an interface from its name. `wireless_hint` carries what the
/// platform knows beyond the name (e.g. a `wireless` sysfs node).
pub fn classify_interface(name: &str, loopback: bool, wireless_hint: bool) -> InterfaceKind {
    let lower = name.to_lowercase();
    if loopback || lower == "lo" || lower.starts_with("lo0") || lower.starts_with("loopback") {
        InterfaceKind::Loopback
    } else if is_virtual_interface(&lower) {
        InterfaceKind::Virtual
    } else if wireless_hint || is_wireless_name(&lower) {
        InterfaceKind::Wireless
    } else if ["eth", "en", "em", "local area connection"]
        .iter()
        .any(|p| lower.starts_with(p))
    {
        InterfaceKind::Wired
    } else {
        InterfaceKind::Other
    }
}

#[cfg(target_os = "linux")]
fn has_wireless_node(name: &str) -> bool {
    std::path::Path::new("/sys/class/net")
        .join(name)
        .join("wireless")
        .exists()
}

#[cfg(not(target_os = "linux"))]
fn has_wireless_node(_name: &str) -> bool {
    false
}

/// IPv4 addresses of every local interface.
#[cfg(unix)]
pub fn list_interfaces() -> std::io::Result<Vec<InterfaceAddress>> {
    use std::ffi::CStr;

    let mut interfaces = Vec::new();
    let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();

    // SAFETY: getifaddrs fills `ifaddrs` with a list released by freeifaddrs below.
    let ret = unsafe { libc::getifaddrs(&mut ifaddrs) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let mut ifa = ifaddrs;
    while !ifa.is_null() {
        // SAFETY: non-null entries of the list stay valid until freeifaddrs.
        let entry = unsafe { &*ifa };
        ifa = entry.ifa_next;

        if entry.ifa_addr.is_null() {
            continue;
        }
        // SAFETY: checked non-null; only the family tag is read before the cast.
        let family = unsafe { (*entry.ifa_addr).sa_family } as i32;
        if family != libc::AF_INET {
            continue;
        }
        // SAFETY: AF_INET entries carry a sockaddr_in.
        let raw = unsafe { (*(entry.ifa_addr as *const libc::sockaddr_in)).sin_addr.s_addr };
        let address = Ipv4Addr::from(u32::from_be(raw));

        // SAFETY: ifa_name is a NUL-terminated string owned by the list.
        let name = unsafe { CStr::from_ptr(entry.ifa_name) }
            .to_string_lossy()
            .into_owned();
        let flags = entry.ifa_flags;
        let up = flags & (libc::IFF_UP as libc::c_uint) != 0;
        let loopback = flags & (libc::IFF_LOOPBACK as libc::c_uint) != 0;
        let kind = classify_interface(&name, loopback, has_wireless_node(&name));

        interfaces.push(InterfaceAddress {
            name,
            address,
            up,
            kind,
        });
    }

    // SAFETY: `ifaddrs` came from getifaddrs and has not been freed yet.
    unsafe { libc::freeifaddrs(ifaddrs) };

    Ok(interfaces)
}

/// IPv4 addresses of every local interface.
#[cfg(not(unix))]
pub fn list_interfaces() -> std::io::Result<Vec<InterfaceAddress>> {
    let pairs = local_ip_address::list_afinet_netifas()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(interfaces_from_pairs(pairs))
}

/// Build listings from `(name, address)` pairs, which carry no interface
/// flags: every entry counts as up and loopback is read off the address.
pub fn interfaces_from_pairs(
    pairs: impl IntoIterator<Item = (String, IpAddr)>,
) -> Vec<InterfaceAddress> {
    pairs
        .into_iter()
        .filter_map(|(name, ip)| match ip {
            IpAddr::V4(address) => {
                let kind = classify_interface(&name, address.is_loopback(), false);
                Some(InterfaceAddress {
                    name,
                    address,
                    up: true,
                    kind,
                })
            }
            IpAddr::V6(_) => None,
        })
        .collect()
}

/// First address of an up wired interface, else of an up wireless one.
pub fn select_bind_address(interfaces: &[InterfaceAddress]) -> Option<IpAddr> {
    [InterfaceKind::Wired, InterfaceKind::Wireless]
        .into_iter()
        .find_map(|kind| {
            interfaces
                .iter()
                .find(|i| i.up && i.kind == kind && !i.address.is_unspecified())
        })
        .map(|i| IpAddr::V4(i.address))
}

pub fn discover_bind_address() -> BridgeResult<IpAddr> {
    const MESSAGE: &str = "Could not determine local IP-address to broadcast serial readings on.";
    let interfaces =
        list_interfaces().map_err(|err| BridgeError::network(MESSAGE).with_source(err))?;
    log::debug!("network interfaces: {interfaces:?}");
    select_bind_address(&interfaces).ok_or_else(|| BridgeError::network(MESSAGE))
}
