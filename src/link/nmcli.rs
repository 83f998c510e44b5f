//! NetworkManager link driver
//!
//! Drives station association through the `nmcli` command line tool. The
//! association request is issued with `--wait 0` so it returns immediately
//! and [`NetworkLink`](super::NetworkLink) does the status polling itself.

use super::{LinkDriver, LinkStatus};
use crate::config::NetworkCredential;
use crate::error::{sanitize_output, NetworkError};
use async_trait::async_trait;
use std::process::Output;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tracing::debug;

const NMCLI: &str = "nmcli";

/// `nmcli device wifi connect` names the profile it creates after the SSID,
/// so the CONNECTION column identifies the network a device is on.
#[derive(Debug, Clone, Default)]
pub struct NmcliLink {
    interface: Option<String>,
    requested: Arc<Mutex<Option<String>>>,
}

impl NmcliLink {
    pub fn new(interface: Option<String>) -> Self {
        Self {
            interface,
            requested: Arc::default(),
        }
    }

    /// Arguments of the association request (secret included)
    pub fn connect_args(&self, credential: &NetworkCredential) -> Vec<String> {
        let mut args: Vec<String> = ["--wait", "0", "device", "wifi", "connect"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(credential.ssid.clone());
        if !credential.secret.is_empty() {
            args.push("password".to_string());
            args.push(credential.secret.clone());
        }
        if let Some(interface) = &self.interface {
            args.push("ifname".to_string());
            args.push(interface.clone());
        }
        args
    }

    /// Arguments of the status query
    pub fn status_args(&self) -> Vec<String> {
        ["-t", "-f", "DEVICE,TYPE,STATE,CONNECTION", "device"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn requested_ssid(&self) -> Option<String> {
        self.requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_requested_ssid(&self, ssid: Option<String>) {
        *self
            .requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = ssid;
    }

    async fn run(&self, args: &[String], secret: &str) -> Result<String, NetworkError> {
        let output: Output = Command::new(NMCLI)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| NetworkError::Driver(format!("failed to run {NMCLI}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NetworkError::Driver(sanitize_output(
                &format!("{NMCLI} exited with {}: {}", output.status, stderr.trim()),
                secret,
            )));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl LinkDriver for NmcliLink {
    async fn begin(&self, credential: &NetworkCredential) -> Result<(), NetworkError> {
        self.set_requested_ssid(Some(credential.ssid.clone()));
        let args = self.connect_args(credential);
        let output = self.run(&args, &credential.secret).await?;
        debug!(
            output = %sanitize_output(output.trim(), &credential.secret),
            "Association requested"
        );
        Ok(())
    }

    async fn status(&self) -> Result<LinkStatus, NetworkError> {
        // Nothing requested yet, so no device can be on our network
        let Some(ssid) = self.requested_ssid() else {
            return Ok(LinkStatus::Idle);
        };
        let output = self.run(&self.status_args(), "").await?;
        Ok(parse_device_table(&output, self.interface.as_deref(), &ssid))
    }

    async fn disconnect(&self) -> Result<(), NetworkError> {
        self.set_requested_ssid(None);
        match &self.interface {
            Some(interface) => {
                let args = vec![
                    "device".to_string(),
                    "disconnect".to_string(),
                    interface.clone(),
                ];
                self.run(&args, "").await.map(|_| ())
            }
            None => Ok(()),
        }
    }
}

/// Split one line of `nmcli -t` output, undoing its `\:` and `\\` escapes
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.extend(chars.next()),
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parse `nmcli -t -f DEVICE,TYPE,STATE,CONNECTION device` output,
/// e.g. `wlan0:wifi:connected:greenhouse`.
///
/// Only the named interface is considered, or every wifi device when no
/// interface is configured. Associated requires a connected device whose
/// connection is `ssid`; a device on another network counts as Idle.
pub fn parse_device_table(output: &str, interface: Option<&str>, ssid: &str) -> LinkStatus {
    let mut status = LinkStatus::Idle;
    for fields in output.lines().map(split_terse) {
        let [device, kind, state, connection] = fields.as_slice() else {
            continue;
        };
        let selected = match interface {
            Some(interface) => device == interface,
            None => kind == "wifi",
        };
        if !selected {
            continue;
        }

        if state.starts_with("connecting") {
            status = LinkStatus::Associating;
        } else if state.starts_with("connected") && connection == ssid {
            return LinkStatus::Associated;
        }
    }
    status
}
