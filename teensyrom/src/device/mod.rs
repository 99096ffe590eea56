//! Port classification and handshake candidate ordering.
//!
//! The cartridge enumerates as a Teensy USB serial device. Enumeration alone
//! cannot prove a port is a TeensyROM (only the handshake can), but it lets
//! the connection manager try the likeliest ports first.

use {
    crate::port::{PortInfo, Transport},
    log::{debug, trace},
};

/// Known USB device kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// PJRC Teensy USB serial (the microcontroller inside the cartridge).
    Teensy,
    /// Anything else.
    Unknown,
}

/// PJRC vendor ID and the Teensyduino product IDs that expose a serial port.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[(
    0x16C0,
    &[0x0483, 0x0487, 0x0489, 0x048A, 0x048B, 0x04D0],
    DeviceKind::Teensy,
)];

impl DeviceKind {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Teensy => "Teensy",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Discovered port with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPort {
    /// Endpoint name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl From<PortInfo> for DetectedPort {
    fn from(info: PortInfo) -> Self {
        let device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid(vid, pid),
            _ => DeviceKind::Unknown,
        };
        if let (Some(vid), Some(pid)) = (info.vid, info.pid) {
            trace!(
                "Found USB port: {} (VID: {vid:04X}, PID: {pid:04X}, Device: {device:?})",
                info.name
            );
        }
        Self {
            name: info.name,
            device,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }
}

/// Enumerate and classify ports. An enumeration failure yields no ports.
pub fn detect_ports<T: Transport>(transport: &T) -> Vec<DetectedPort> {
    match transport.list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(DetectedPort::from)
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Order in which the handshake tries ports:
///
/// 1. the port staged with `set_port`, even if enumeration missed it
/// 2. visible ports a TeensyROM answered on before
/// 3. visible ports that enumerate as a Teensy
/// 4. everything else, by name
pub fn order_candidates(
    ports: &[DetectedPort],
    staged: Option<&str>,
    known: &[String],
) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(ports.len() + 1);
    let mut push = |name: &str| {
        if !ordered
            .iter()
            .any(|n| n == name)
        {
            ordered.push(name.to_string());
        }
    };

    if let Some(staged) = staged {
        push(staged);
    }
    for name in known {
        if ports
            .iter()
            .any(|p| &p.name == name)
        {
            push(name);
        }
    }

    let mut rest: Vec<&DetectedPort> = ports
        .iter()
        .collect();
    rest.sort_by(|a, b| {
        b.device
            .is_known()
            .cmp(
                &a.device
                    .is_known(),
            )
            .then_with(|| {
                a.name
                    .cmp(&b.name)
            })
    });
    for port in rest {
        push(&port.name);
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, vid_pid: Option<(u16, u16)>) -> DetectedPort {
        DetectedPort::from(PortInfo {
            name: name.to_string(),
            vid: vid_pid.map(|(v, _)| v),
            pid: vid_pid.map(|(_, p)| p),
            ..PortInfo::default()
        })
    }

    #[test]
    fn test_teensy_classification() {
        assert_eq!(DeviceKind::from_vid_pid(0x16C0, 0x0483), DeviceKind::Teensy);
        assert_eq!(DeviceKind::from_vid_pid(0x16C0, 0x0001), DeviceKind::Unknown);
        assert_eq!(DeviceKind::from_vid_pid(0x1A86, 0x7523), DeviceKind::Unknown);
        assert!(DeviceKind::Teensy.is_known());
        assert_eq!(DeviceKind::Teensy.name(), "Teensy");
    }

    #[test]
    fn test_port_without_usb_info_is_unknown() {
        assert_eq!(port("/dev/ttyS0", None).device, DeviceKind::Unknown);
    }

    #[test]
    fn test_order_prefers_teensy_then_name() {
        let ports = vec![
            port("COM9", None),
            port("COM1", None),
            port("COM5", Some((0x16C0, 0x0483))),
        ];
        assert_eq!(order_candidates(&ports, None, &[]), vec!["COM5", "COM1", "COM9"]);
    }

    #[test]
    fn test_order_staged_and_known_first() {
        let ports = vec![
            port("COM1", None),
            port("COM2", None),
            port("COM5", Some((0x16C0, 0x0483))),
        ];
        let known = vec!["COM2".to_string(), "COM7".to_string()];
        assert_eq!(
            order_candidates(&ports, Some("/dev/custom"), &known),
            vec!["/dev/custom", "COM2", "COM5", "COM1"]
        );
    }

    #[test]
    fn test_order_removes_duplicates() {
        let ports = vec![port("COM1", None)];
        let known = vec!["COM1".to_string()];
        assert_eq!(order_candidates(&ports, Some("COM1"), &known), vec!["COM1"]);
    }
}
