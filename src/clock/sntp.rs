//! SNTP time source over UDP

use super::TimeSource;
use crate::error::TimeSyncError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
pub const NTP_UNIX_OFFSET_SECS: u64 = 2_208_988_800;

const NTP_PACKET_LEN: usize = 48;

/// Half-RTT corrections above this are treated as bogus and clamped
const MAX_RTT_CORRECTION_MS: u64 = 1000;

/// Single SNTP client exchange per query
#[derive(Debug, Clone)]
pub struct SntpTimeSource {
    server: String,
    max_stratum: u8,
    response_timeout: Duration,
}

impl SntpTimeSource {
    pub fn new(server: impl Into<String>, max_stratum: u8, response_timeout: Duration) -> Self {
        Self {
            server: server.into(),
            max_stratum,
            response_timeout,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }
}

#[async_trait]
impl TimeSource for SntpTimeSource {
    async fn query(&self) -> Result<u64, TimeSyncError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| TimeSyncError::QueryFailed(format!("bind failed: {e}")))?;
        socket
            .connect(&self.server)
            .await
            .map_err(|e| TimeSyncError::QueryFailed(format!("{}: {e}", self.server)))?;

        let sent_at = Instant::now();
        socket
            .send(&build_request())
            .await
            .map_err(|e| TimeSyncError::QueryFailed(format!("send failed: {e}")))?;

        let mut response = [0u8; NTP_PACKET_LEN];
        let received = tokio::time::timeout(self.response_timeout, socket.recv(&mut response))
            .await
            .map_err(|_| TimeSyncError::QueryFailed("no response".to_string()))?
            .map_err(|e| TimeSyncError::QueryFailed(format!("receive failed: {e}")))?;

        let transmit_ms = parse_response(&response[..received], self.max_stratum)?;
        let correction = (sent_at.elapsed().as_millis() as u64 / 2).min(MAX_RTT_CORRECTION_MS);
        debug!(server = %self.server, correction_ms = correction, "SNTP response");

        Ok(transmit_ms + correction)
    }
}

/// Client request: LI=0, VN=3, Mode=3
pub fn build_request() -> [u8; NTP_PACKET_LEN] {
    let mut packet = [0u8; NTP_PACKET_LEN];
    packet[0] = 0x1B;
    packet
}

/// Extract the server transmit timestamp as Unix epoch milliseconds
pub fn parse_response(packet: &[u8], max_stratum: u8) -> Result<u64, TimeSyncError> {
    if packet.len() < NTP_PACKET_LEN {
        return Err(TimeSyncError::InvalidResponse(format!(
            "short packet of {} bytes",
            packet.len()
        )));
    }

    let mode = packet[0] & 0x07;
    if mode != 4 {
        return Err(TimeSyncError::InvalidResponse(format!(
            "unexpected mode {mode}"
        )));
    }

    let stratum = packet[1];
    if stratum == 0 || stratum > max_stratum {
        return Err(TimeSyncError::InvalidResponse(format!(
            "stratum {stratum} outside 1..={max_stratum}"
        )));
    }

    let secs = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]) as u64;
    let frac = u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]) as u64;

    let unix_secs = secs.checked_sub(NTP_UNIX_OFFSET_SECS).ok_or_else(|| {
        TimeSyncError::InvalidResponse(format!("transmit timestamp {secs} predates 1970"))
    })?;

    Ok(unix_secs * 1000 + ((frac * 1000) >> 32))
}
