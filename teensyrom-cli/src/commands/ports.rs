//! `list-ports`: enumerate serial ports and show which one would be tried first.

use anyhow::Result;
use console::style;
use teensyrom::{DetectedPort, NativeTransport, detect_ports, order_candidates};

use crate::{Cli, config::Config};

/// List serial ports, as text on stderr or as JSON on stdout.
pub(crate) fn cmd_list_ports(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let detected = detect_ports(&NativeTransport);

    if json {
        println!("{}", ports_json(&detected)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };

        let product = port.product.as_deref().unwrap_or("");
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };

        eprintln!(
            "  {} {}{}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            device_type,
            vid_pid,
            if !product.is_empty() {
                format!(" - {}", style(product).dim())
            } else {
                String::new()
            }
        );
    }

    let staged = cli
        .port
        .as_deref()
        .or(config.connection.port.as_deref());
    if let Some(first) = order_candidates(&detected, staged, &config.known_ports).first() {
        eprintln!(
            "\n{} Will try {} first",
            style("→").green().bold(),
            style(first).cyan().bold()
        );
    }
    Ok(())
}

fn ports_json(detected: &[DetectedPort]) -> Result<String> {
    let ports: Vec<serde_json::Value> = detected
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "device": p.device.name(),
                "known": p.device.is_known(),
                "vid": p.vid,
                "pid": p.pid,
                "manufacturer": p.manufacturer,
                "product": p.product,
                "serial": p.serial,
            })
        })
        .collect();
    Ok(serde_json::to_string_pretty(&ports)?)
}
