//! Command codes and port naming.
//!
//! Ports 1-8 are the high-speed CAN channels, 9-16 the CAN FD channels.
//! LIN channels share the low numbers with high-speed CAN.

/// CAN-carrying frames, `field2` is the port.
pub const CMD_AP_TEST: u16 = 0x0001;

/// Application send command.
pub const CMD_AP_SEND: u16 = 0x0FFF;

/// Offset of the CAN FD ports.
pub const CANFD_PORT_BASE: u16 = 8;

/// Resolve a channel name (`CANHS3`, `CANFD1`, `LIN2`) to a port number.
///
/// Returns `None` for unknown prefixes or a non-numeric suffix.
pub fn parse_channel(name: &str) -> Option<u16> {
    let name = name.trim();
    if let Some(n) = name.strip_prefix("CANHS") {
        n.parse().ok()
    } else if let Some(n) = name.strip_prefix("CANFD") {
        n.parse::<u16>().ok()?.checked_add(CANFD_PORT_BASE)
    } else if let Some(n) = name.strip_prefix("LIN") {
        n.parse().ok()
    } else {
        None
    }
}

/// Human-readable name for a port, assuming CAN channels.
pub fn port_name(port: u16) -> String {
    match port {
        1..=8 => format!("CANHS{port}"),
        9..=16 => format!("CANFD{}", port - CANFD_PORT_BASE),
        _ => format!("PORT{port}"),
    }
}

/// Human-readable name for a command code.
pub fn command_name(cmd: u16) -> &'static str {
    match cmd {
        CMD_AP_TEST => "AP_TEST",
        CMD_AP_SEND => "AP_SEND",
        _ => "UNKNOWN",
    }
}
