//! Console status board
//!
//! Listens to every device message, keeps the latest picture of the
//! device and reports changes through the log. It stands in for the web
//! page the device normally serves.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionState, HandlerRegistry, LinkEvent};
use crate::protocol::{
    kinds, AmsUnit, CommandResult, DeviceStatus, InboundMessage, NfcData, NfcTagStatus, TagFormat,
    Tray, WriteResult,
};

/// Message types the board listens to
const WATCHED: [&str; 9] = [
    kinds::AMS_DATA,
    kinds::NFC_TAG,
    kinds::NFC_DATA,
    kinds::WRITE_NFC_TAG,
    kinds::HEARTBEAT,
    kinds::SET_SPOOLMAN_SETTINGS,
    kinds::SCALE,
    kinds::SAVE_MOONRAKER_SETTINGS,
    kinds::SAVE_PRINT_FARMER_SETTINGS,
];

/// Latest known device state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub connection: ConnectionState,
    pub ams: Vec<AmsUnit>,
    pub tag: Option<NfcTagStatus>,
    pub tag_data: Option<NfcData>,
    pub device: Option<DeviceStatus>,
    pub last_write: Option<WriteResult>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Shared, cheaply cloneable board
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    snapshot: Arc<RwLock<DeviceSnapshot>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the board for every device message type
    pub fn install(&self, registry: &mut HandlerRegistry) {
        for kind in WATCHED {
            let board = self.clone();
            registry.on(kind, move |message| board.apply(message));
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.read().clone()
    }

    /// Fold one device message into the snapshot
    pub fn apply(&self, message: &InboundMessage) {
        let mut snap = self.snapshot.write();
        snap.last_update = Some(Utc::now());

        match message {
            InboundMessage::AmsData(units) => {
                let loaded: usize = units
                    .iter()
                    .map(|unit| unit.tray.iter().filter(|t| !t.is_empty()).count())
                    .sum();
                if snap.ams != *units {
                    info!(units = units.len(), loaded_trays = loaded, "AMS data updated");
                }
                snap.ams = units.clone();
            }

            InboundMessage::NfcTag(status) => {
                if snap.tag != Some(*status) {
                    match status {
                        NfcTagStatus::Present => info!("Spool tag detected"),
                        NfcTagStatus::Absent => info!("No tag on reader"),
                        NfcTagStatus::Other(code) => warn!(code, "Tag read error"),
                    }
                }
                snap.tag = Some(*status);
            }

            InboundMessage::NfcData(data) => {
                log_tag_data(data);
                snap.tag_data = Some(data.clone());
            }

            InboundMessage::WriteNfcTag(result) => {
                if result.success {
                    info!("Write success");
                } else {
                    warn!("Write failed");
                }
                snap.last_write = Some(*result);
            }

            InboundMessage::Heartbeat(status) => {
                log_service_changes(snap.device.as_ref(), status);
                debug!(free_heap_kb = ?status.free_heap_kb, "Heartbeat reply");
                snap.device = Some(*status);
            }

            InboundMessage::SetSpoolmanSettings(result) => {
                log_result("Spoolman settings", result)
            }
            InboundMessage::Scale(result) => log_result("Scale command", result),
            InboundMessage::SaveMoonrakerSettings(result) => {
                log_result("Moonraker settings", result)
            }
            InboundMessage::SavePrintFarmerSettings(result) => {
                log_result("PrintFarmer settings", result)
            }

            InboundMessage::Other(frame) => debug!(message_type = %frame.kind, "Unrecognized message"),
        }
    }

    /// Mirror link activity: state changes feed the connection indicator,
    /// notifications are logged like toasts
    pub fn on_link_event(&self, event: &LinkEvent) {
        match event {
            LinkEvent::StateChanged(state) => {
                self.snapshot.write().connection = *state;
                match state {
                    ConnectionState::Connected => info!("● Connected"),
                    ConnectionState::Connecting => info!("◌ Connecting"),
                    ConnectionState::Disconnected => warn!("○ Disconnected"),
                }
            }
            LinkEvent::ReconnectScheduled { delay } => {
                info!(delay_ms = delay.as_millis() as u64, "Reconnecting soon")
            }
            LinkEvent::Notification { message, success: true } => info!("{}", message),
            LinkEvent::Notification { message, success: false } => warn!("{}", message),
        }
    }

    /// Multi-line summary for terminal output
    pub fn render(&self) -> String {
        let snap = self.snapshot.read();
        let mut out = String::new();

        let _ = writeln!(out, "Connection:  {}", snap.connection);
        match &snap.device {
            Some(device) => {
                let _ = writeln!(out, "Bambu:       {}", online(device.bambu_connected));
                let _ = writeln!(out, "Spoolman:    {}", online(device.spoolman_connected));
                if let Some(heap) = device.free_heap_kb {
                    let _ = writeln!(out, "Free heap:   {}k", heap);
                }
            }
            None => {
                let _ = writeln!(out, "Services:    unknown");
            }
        }

        let reader = match snap.tag {
            Some(NfcTagStatus::Present) => "tag present".to_string(),
            Some(NfcTagStatus::Absent) => "no tag".to_string(),
            Some(NfcTagStatus::Other(code)) => format!("read error ({})", code),
            None => "unknown".to_string(),
        };
        let _ = writeln!(out, "Reader:      {}", reader);

        if let Some(data) = &snap.tag_data {
            if let Some(summary) = describe_tag(data) {
                let _ = writeln!(out, "Tag:         {}", summary);
            }
        }

        for unit in &snap.ams {
            let _ = writeln!(out, "{}:", unit.display_name());
            for tray in &unit.tray {
                let _ = writeln!(out, "  {}", describe_tray(tray));
            }
        }

        if let Some(at) = snap.last_update {
            let _ = writeln!(out, "Updated:     {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }

        out
    }
}

fn online(flag: bool) -> &'static str {
    if flag {
        "online"
    } else {
        "offline"
    }
}

fn log_service_changes(previous: Option<&DeviceStatus>, current: &DeviceStatus) {
    let services = [
        ("Bambu", previous.map(|p| p.bambu_connected), current.bambu_connected),
        ("Spoolman", previous.map(|p| p.spoolman_connected), current.spoolman_connected),
    ];

    for (service, before, now) in services {
        if before == Some(now) {
            continue;
        }
        if now {
            info!(service, "Service online");
        } else {
            warn!(service, "Service offline, `spool-link reconnect` can retry it");
        }
    }
}

fn log_tag_data(data: &NfcData) {
    if let Some(error) = data.error() {
        warn!(error, "Reader error");
    } else if let Some(message) = data.info() {
        info!(info = message, "Reader");
    } else if data.is_empty() {
        debug!("Tag data cleared");
    } else if let Some(summary) = describe_tag(data) {
        info!(tag = %summary, "Tag read");
    }
}

fn log_result(what: &str, result: &CommandResult) {
    match result {
        CommandResult::Success => info!("{} applied", what),
        CommandResult::Failed(reason) => warn!(reason = %reason, "{} failed", what),
    }
}

fn describe_tag(data: &NfcData) -> Option<String> {
    if data.is_empty() || data.error().is_some() || data.info().is_some() {
        return None;
    }

    let mut parts = Vec::new();
    if data.format == TagFormat::OpenPrintTag {
        parts.push("OpenPrintTag".to_string());
    }
    if let Some(id) = data.spoolman_id() {
        parts.push(format!("spool #{}", id));
    }
    if let Some(location) = data.location() {
        parts.push(format!("location {}", location));
    }
    for field in ["brand", "type", "color_hex"] {
        if let Some(value) = data.text(field) {
            parts.push(value);
        }
    }

    if parts.is_empty() {
        parts.push(format!("{} fields", data.fields.len()));
    }
    Some(parts.join(", "))
}

fn describe_tray(tray: &Tray) -> String {
    let slot = tray
        .id
        .map(|id| format!("Tray {}", id))
        .unwrap_or_else(|| "Tray ?".to_string());

    if tray.is_empty() {
        return format!("{}: empty", slot);
    }

    let mut line = slot;
    line.push(':');
    for value in [&tray.tray_type, &tray.tray_sub_brands, &tray.tray_color]
        .into_iter()
        .flatten()
    {
        line.push(' ');
        line.push_str(value);
    }
    if let (Some(min), Some(max)) = (tray.nozzle_temp_min, tray.nozzle_temp_max) {
        let _ = write!(line, " {}-{}°C", min, max);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Dispatch;
    use crate::protocol::InboundFrame;

    fn feed(board: &StatusBoard, raw: &str) -> Dispatch {
        let mut registry = HandlerRegistry::new();
        board.install(&mut registry);
        registry.dispatch(&InboundFrame::parse(raw).unwrap())
    }

    #[test]
    fn test_install_covers_device_messages() {
        let mut registry = HandlerRegistry::new();
        StatusBoard::new().install(&mut registry);
        for kind in WATCHED {
            assert!(registry.handles(kind), "missing {}", kind);
        }
        assert!(!registry.handles(kinds::RECONNECT));
    }

    #[test]
    fn test_heartbeat_updates_services() {
        let board = StatusBoard::new();
        feed(
            &board,
            r#"{"type":"heartbeat","freeHeap":97,"bambu_connected":0,"spoolman_connected":1}"#,
        );

        let device = board.snapshot().device.unwrap();
        assert!(!device.bambu_connected);
        assert!(device.spoolman_connected);
        assert_eq!(device.free_heap_kb, Some(97));
        assert!(board.snapshot().last_update.is_some());
    }

    #[test]
    fn test_ams_and_tag_state() {
        let board = StatusBoard::new();
        feed(
            &board,
            r#"{"type":"amsData","payload":[
                {"ams_id":0,"tray":[{"id":0,"tray_type":"PLA","tray_sub_brands":"PLA Basic","tray_color":"FF0000FF","nozzle_temp_min":190,"nozzle_temp_max":230},
                                    {"id":1,"tray_type":"","tray_info_idx":"null"}]},
                {"ams_id":255,"tray":[]}]}"#,
        );
        feed(&board, r#"{"type":"nfcTag","payload":{"found":1}}"#);
        feed(
            &board,
            r#"{"type":"nfcData","payload":{"sm_id":"42","brand":"Polymaker","type":"PETG"}}"#,
        );

        let snap = board.snapshot();
        assert_eq!(snap.ams.len(), 2);
        assert_eq!(snap.tag, Some(NfcTagStatus::Present));

        let text = board.render();
        assert!(text.contains("AMS 0:"));
        assert!(text.contains("Tray 0: PLA PLA Basic FF0000FF 190-230°C"));
        assert!(text.contains("Tray 1: empty"));
        assert!(text.contains("External Spool:"));
        assert!(text.contains("spool #42, Polymaker, PETG"));
        assert!(text.contains("Reader:      tag present"));
    }

    #[test]
    fn test_write_result_recorded() {
        let board = StatusBoard::new();
        feed(&board, r#"{"type":"writeNfcTag","success":0}"#);
        assert_eq!(board.snapshot().last_write, Some(WriteResult { success: false }));
    }

    #[test]
    fn test_reader_error_is_not_a_tag() {
        let data = NfcData {
            format: TagFormat::Json,
            fields: serde_json::from_str(r#"{"error":"Tag read failed"}"#).unwrap(),
        };
        assert!(describe_tag(&data).is_none());
    }

    #[test]
    fn test_link_events_drive_connection_indicator() {
        let board = StatusBoard::new();
        board.on_link_event(&LinkEvent::StateChanged(ConnectionState::Connected));
        assert_eq!(board.snapshot().connection, ConnectionState::Connected);
        assert!(board.render().starts_with("Connection:  connected"));

        board.on_link_event(&LinkEvent::StateChanged(ConnectionState::Disconnected));
        assert_eq!(board.snapshot().connection, ConnectionState::Disconnected);
    }

    #[test]
    fn test_render_before_any_data() {
        let text = StatusBoard::new().render();
        assert!(text.contains("Services:    unknown"));
        assert!(text.contains("Reader:      unknown"));
        assert!(!text.contains("Updated:"));
    }
}
