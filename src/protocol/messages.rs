//! Device protocol message definitions
//!
//! One JSON object per WebSocket text frame, discriminated by a string
//! `type` field. Inbound frames are parsed in two steps: [`InboundFrame`]
//! only extracts the discriminator, [`InboundMessage::decode`] builds the
//! typed payload for the handler that asked for it.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Wire names of the `type` discriminator
pub mod kinds {
    pub const AMS_DATA: &str = "amsData";
    pub const NFC_TAG: &str = "nfcTag";
    pub const NFC_DATA: &str = "nfcData";
    pub const WRITE_NFC_TAG: &str = "writeNfcTag";
    pub const WRITE_OPEN_PRINT_TAG: &str = "writeOpenPrintTag";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const RECONNECT: &str = "reconnect";
    pub const SET_BAMBU_SPOOL: &str = "setBambuSpool";
    pub const SET_SPOOLMAN_SETTINGS: &str = "setSpoolmanSettings";
    pub const SCALE: &str = "scale";
    pub const SAVE_MOONRAKER_SETTINGS: &str = "saveMoonrakerSettings";
    pub const SAVE_PRINT_FARMER_SETTINGS: &str = "savePrintFarmerSettings";
}

/// `ams_id` the device uses for the external spool holder
pub const EXTERNAL_AMS_ID: i64 = 255;

/// `trayId` of the external spool holder
pub const EXTERNAL_TRAY_ID: i64 = 254;

/// Tag format marker for OpenPrintTag payloads
pub const OPEN_PRINT_TAG_FORMAT: &str = "openprinttag";

// ─────────────────────────────────────────────────────────────────
// Inbound Frame
// ─────────────────────────────────────────────────────────────────

/// A parsed inbound frame whose payload has not been interpreted yet
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    /// The `type` discriminator
    pub kind: String,

    /// The whole JSON object, including `type`
    pub body: Map<String, Value>,
}

impl InboundFrame {
    /// Parse a raw text frame
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(body) = value else {
            return Err(Error::malformed("frame is not a JSON object"));
        };

        let kind = match body.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(Error::malformed("'type' is not a string")),
            None => return Err(Error::malformed("frame has no 'type' field")),
        };

        Ok(Self { kind, body })
    }

    /// The `payload` member, if any
    pub fn payload(&self) -> Option<&Value> {
        self.body.get("payload")
    }

    /// Look up a field at the top level, then inside an object `payload`
    fn field(&self, name: &str) -> Option<&Value> {
        self.body
            .get(name)
            .or_else(|| self.payload().and_then(|p| p.get(name)))
    }

    fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        let payload = self
            .payload()
            .ok_or_else(|| Error::malformed(format!("'{}' frame has no payload", self.kind)))?;
        T::deserialize(payload).map_err(|e| Error::malformed(format!("'{}' payload: {}", self.kind, e)))
    }
}

// ─────────────────────────────────────────────────────────────────
// Inbound Messages (Discriminated Union)
// ─────────────────────────────────────────────────────────────────

/// Device → client messages
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// State of every AMS unit, external holder included
    AmsData(Vec<AmsUnit>),

    /// Tag presence on the reader
    NfcTag(NfcTagStatus),

    /// Contents (or reader status) of the current tag
    NfcData(NfcData),

    /// Outcome of a tag write
    WriteNfcTag(WriteResult),

    /// Heartbeat reply carrying device health
    Heartbeat(DeviceStatus),

    /// Outcome of a Spoolman settings update
    SetSpoolmanSettings(CommandResult),

    /// Outcome of a scale command
    Scale(CommandResult),

    /// Outcome of saving Moonraker settings
    SaveMoonrakerSettings(CommandResult),

    /// Outcome of saving PrintFarmer settings
    SavePrintFarmerSettings(CommandResult),

    /// A type this client has no typed form for
    Other(InboundFrame),
}

impl InboundMessage {
    /// Build the typed message for a frame
    pub fn decode(frame: &InboundFrame) -> Result<Self> {
        let message = match frame.kind.as_str() {
            kinds::AMS_DATA => InboundMessage::AmsData(frame.payload_as()?),
            kinds::NFC_TAG => {
                let found = frame
                    .payload()
                    .and_then(|p| p.get("found"))
                    .and_then(as_loose_i64)
                    .ok_or_else(|| Error::malformed("'nfcTag' payload has no 'found' value"))?;
                InboundMessage::NfcTag(NfcTagStatus::from_code(found))
            }
            kinds::NFC_DATA => {
                let fields = match frame.payload() {
                    Some(Value::Object(fields)) => fields.clone(),
                    Some(Value::Null) | None => Map::new(),
                    Some(_) => return Err(Error::malformed("'nfcData' payload is not an object")),
                };
                let format = frame
                    .body
                    .get("format")
                    .or_else(|| fields.get("format"))
                    .and_then(Value::as_str)
                    .map(TagFormat::from_wire)
                    .unwrap_or(TagFormat::Json);
                InboundMessage::NfcData(NfcData { format, fields })
            }
            kinds::WRITE_NFC_TAG => {
                let success = frame.field("success").and_then(as_loose_bool).ok_or_else(|| {
                    Error::malformed("'writeNfcTag' reply has no 'success' value")
                })?;
                InboundMessage::WriteNfcTag(WriteResult { success })
            }
            kinds::HEARTBEAT => InboundMessage::Heartbeat(DeviceStatus {
                bambu_connected: frame.field("bambu_connected").and_then(as_loose_bool).unwrap_or(false),
                spoolman_connected: frame
                    .field("spoolman_connected")
                    .and_then(as_loose_bool)
                    .unwrap_or(false),
                free_heap_kb: frame.field("freeHeap").and_then(as_loose_i64),
            }),
            kinds::SET_SPOOLMAN_SETTINGS => {
                InboundMessage::SetSpoolmanSettings(CommandResult::from_payload(frame.payload()))
            }
            kinds::SCALE => InboundMessage::Scale(CommandResult::from_payload(frame.payload())),
            kinds::SAVE_MOONRAKER_SETTINGS => {
                InboundMessage::SaveMoonrakerSettings(CommandResult::from_payload(frame.payload()))
            }
            kinds::SAVE_PRINT_FARMER_SETTINGS => {
                InboundMessage::SavePrintFarmerSettings(CommandResult::from_payload(frame.payload()))
            }
            _ => InboundMessage::Other(frame.clone()),
        };

        Ok(message)
    }

    /// Get the message type name
    pub fn type_name(&self) -> &str {
        match self {
            InboundMessage::AmsData(_) => kinds::AMS_DATA,
            InboundMessage::NfcTag(_) => kinds::NFC_TAG,
            InboundMessage::NfcData(_) => kinds::NFC_DATA,
            InboundMessage::WriteNfcTag(_) => kinds::WRITE_NFC_TAG,
            InboundMessage::Heartbeat(_) => kinds::HEARTBEAT,
            InboundMessage::SetSpoolmanSettings(_) => kinds::SET_SPOOLMAN_SETTINGS,
            InboundMessage::Scale(_) => kinds::SCALE,
            InboundMessage::SaveMoonrakerSettings(_) => kinds::SAVE_MOONRAKER_SETTINGS,
            InboundMessage::SavePrintFarmerSettings(_) => kinds::SAVE_PRINT_FARMER_SETTINGS,
            InboundMessage::Other(frame) => &frame.kind,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Inbound Payloads
// ─────────────────────────────────────────────────────────────────

/// One AMS unit as reported by the device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmsUnit {
    #[serde(default, deserialize_with = "de_loose_i64")]
    pub ams_id: Option<i64>,

    #[serde(default)]
    pub tray: Vec<Tray>,
}

impl AmsUnit {
    /// Whether this is the external spool holder rather than an AMS
    pub fn is_external(&self) -> bool {
        self.ams_id == Some(EXTERNAL_AMS_ID)
    }

    /// Display name used in status output
    pub fn display_name(&self) -> String {
        match self.ams_id {
            Some(EXTERNAL_AMS_ID) => "External Spool".to_string(),
            Some(id) => format!("AMS {}", id),
            None => "AMS ?".to_string(),
        }
    }
}

/// One tray slot. The device mixes strings and numbers, so every field
/// is read leniently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tray {
    #[serde(default, deserialize_with = "de_loose_i64")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub tray_type: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub tray_sub_brands: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub tray_color: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub tray_info_idx: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub setting_id: Option<String>,
    #[serde(default, deserialize_with = "de_loose_string")]
    pub cali_idx: Option<String>,
    #[serde(default, deserialize_with = "de_loose_i64")]
    pub nozzle_temp_min: Option<i64>,
    #[serde(default, deserialize_with = "de_loose_i64")]
    pub nozzle_temp_max: Option<i64>,
}

impl Tray {
    /// A tray is empty when none of its identifying fields carry a value.
    /// The firmware writes the literal string "null" for missing values.
    pub fn is_empty(&self) -> bool {
        [
            &self.tray_type,
            &self.tray_sub_brands,
            &self.tray_info_idx,
            &self.setting_id,
            &self.cali_idx,
        ]
        .iter()
        .all(|field| match field {
            Some(v) => v.is_empty() || v == "null",
            None => true,
        })
    }
}

/// Reader state from an `nfcTag` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfcTagStatus {
    /// `found: 0`
    Absent,
    /// `found: 1`
    Present,
    /// Any other code (read error and friends)
    Other(i64),
}

impl NfcTagStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => NfcTagStatus::Absent,
            1 => NfcTagStatus::Present,
            other => NfcTagStatus::Other(other),
        }
    }
}

/// Encoding of the tag contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFormat {
    /// The device's own JSON layout
    Json,
    /// Vendor-neutral OpenPrintTag
    OpenPrintTag,
}

impl TagFormat {
    fn from_wire(s: &str) -> Self {
        if s == OPEN_PRINT_TAG_FORMAT {
            TagFormat::OpenPrintTag
        } else {
            TagFormat::Json
        }
    }
}

/// Tag contents from an `nfcData` frame. Kept as a JSON object: the
/// schema belongs to the device, this client only routes it.
#[derive(Debug, Clone, PartialEq)]
pub struct NfcData {
    pub format: TagFormat,
    pub fields: Map<String, Value>,
}

impl NfcData {
    /// `{}`: reader idle
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Reader error text (`{"error": "..."}`)
    pub fn error(&self) -> Option<&str> {
        self.fields.get("error").and_then(Value::as_str)
    }

    /// Reader progress text (`{"info": "..."}`)
    pub fn info(&self) -> Option<&str> {
        self.fields.get("info").and_then(Value::as_str)
    }

    /// Spoolman id stored on a spool tag
    pub fn spoolman_id(&self) -> Option<String> {
        self.fields.get("sm_id").and_then(as_loose_string)
    }

    /// Storage location stored on a location tag
    pub fn location(&self) -> Option<&str> {
        self.fields.get("location").and_then(Value::as_str)
    }

    /// String-ish field lookup
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name).and_then(as_loose_string)
    }
}

/// Outcome of a tag write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub success: bool,
}

/// Device health carried by heartbeat replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub bambu_connected: bool,
    pub spoolman_connected: bool,
    /// Free heap in KiB
    pub free_heap_kb: Option<i64>,
}

/// `"success"` or an error string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Success,
    Failed(String),
}

impl CommandResult {
    fn from_payload(payload: Option<&Value>) -> Self {
        match payload {
            Some(Value::String(s)) if s == "success" => CommandResult::Success,
            Some(Value::String(s)) => CommandResult::Failed(s.clone()),
            Some(other) => CommandResult::Failed(other.to_string()),
            None => CommandResult::Failed("no payload".to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Outbound Messages
// ─────────────────────────────────────────────────────────────────

/// Client → device messages
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// Liveness probe
    #[serde(rename = "heartbeat")]
    Heartbeat,

    /// Ask the device to reconnect one of its upstream services
    #[serde(rename = "reconnect")]
    Reconnect { payload: Service },

    /// Load a spool into an AMS tray (or clear the external holder)
    #[serde(rename = "setBambuSpool")]
    SetBambuSpool { payload: BambuSpool },

    /// Store Bambu filament settings in Spoolman
    #[serde(rename = "setSpoolmanSettings")]
    SetSpoolmanSettings { payload: SpoolmanSettings },

    /// Write the device JSON layout to the tag on the reader
    #[serde(rename = "writeNfcTag")]
    WriteNfcTag {
        #[serde(rename = "tagType")]
        tag_type: TagType,
        payload: TagPayload,
    },

    /// Write an OpenPrintTag record to the tag on the reader
    #[serde(rename = "writeOpenPrintTag")]
    WriteOpenPrintTag { payload: Map<String, Value> },

    /// Scale control
    #[serde(rename = "scale")]
    Scale {
        payload: ScaleAction,
        #[serde(skip_serializing_if = "Option::is_none")]
        enabled: Option<bool>,
    },

    #[serde(rename = "saveMoonrakerSettings")]
    SaveMoonrakerSettings { payload: MoonrakerSettings },

    #[serde(rename = "savePrintFarmerSettings")]
    SavePrintFarmerSettings { payload: PrintFarmerSettings },
}

impl OutboundMessage {
    /// Get the message type name
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::Heartbeat => kinds::HEARTBEAT,
            OutboundMessage::Reconnect { .. } => kinds::RECONNECT,
            OutboundMessage::SetBambuSpool { .. } => kinds::SET_BAMBU_SPOOL,
            OutboundMessage::SetSpoolmanSettings { .. } => kinds::SET_SPOOLMAN_SETTINGS,
            OutboundMessage::WriteNfcTag { .. } => kinds::WRITE_NFC_TAG,
            OutboundMessage::WriteOpenPrintTag { .. } => kinds::WRITE_OPEN_PRINT_TAG,
            OutboundMessage::Scale { .. } => kinds::SCALE,
            OutboundMessage::SaveMoonrakerSettings { .. } => kinds::SAVE_MOONRAKER_SETTINGS,
            OutboundMessage::SavePrintFarmerSettings { .. } => kinds::SAVE_PRINT_FARMER_SETTINGS,
        }
    }

    /// The inbound type the device answers this message with, if any
    pub fn reply_kind(&self) -> Option<&'static str> {
        match self {
            OutboundMessage::Heartbeat => Some(kinds::HEARTBEAT),
            OutboundMessage::SetSpoolmanSettings { .. } => Some(kinds::SET_SPOOLMAN_SETTINGS),
            OutboundMessage::WriteNfcTag { .. } | OutboundMessage::WriteOpenPrintTag { .. } => {
                Some(kinds::WRITE_NFC_TAG)
            }
            OutboundMessage::Scale { .. } => Some(kinds::SCALE),
            OutboundMessage::SaveMoonrakerSettings { .. } => Some(kinds::SAVE_MOONRAKER_SETTINGS),
            OutboundMessage::SavePrintFarmerSettings { .. } => {
                Some(kinds::SAVE_PRINT_FARMER_SETTINGS)
            }
            OutboundMessage::Reconnect { .. } | OutboundMessage::SetBambuSpool { .. } => None,
        }
    }

    /// Serialize to a text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Spool-tag write
    pub fn write_spool_tag(tag: SpoolTag) -> Self {
        OutboundMessage::WriteNfcTag {
            tag_type: TagType::Spool,
            payload: TagPayload::Spool(tag),
        }
    }

    /// Location-tag write
    pub fn write_location_tag(location: impl Into<String>) -> Self {
        OutboundMessage::WriteNfcTag {
            tag_type: TagType::Location,
            payload: TagPayload::Location {
                location: location.into(),
            },
        }
    }

    /// Auto-tare toggle
    pub fn set_auto_tare(enabled: bool) -> Self {
        OutboundMessage::Scale {
            payload: ScaleAction::SetAutoTare,
            enabled: Some(enabled),
        }
    }
}

/// Upstream services the device can be asked to reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Bambu,
    Spoolman,
}

/// Payload of `setBambuSpool`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BambuSpool {
    #[serde(rename = "amsId")]
    pub ams_id: i64,
    #[serde(rename = "trayId")]
    pub tray_id: i64,
    pub color: String,
    pub nozzle_temp_min: i64,
    pub nozzle_temp_max: i64,
    #[serde(rename = "type")]
    pub material: String,
    pub brand: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tray_info_idx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cali_idx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bambu_setting_id: Option<String>,
}

impl BambuSpool {
    /// Clears the external spool holder
    pub fn external_out() -> Self {
        Self {
            ams_id: EXTERNAL_AMS_ID,
            tray_id: EXTERNAL_TRAY_ID,
            color: DEFAULT_COLOR.to_string(),
            nozzle_temp_min: 0,
            nozzle_temp_max: 0,
            material: String::new(),
            brand: String::new(),
            tray_info_idx: None,
            cali_idx: None,
            bambu_setting_id: None,
        }
    }

    /// Loads a spool into `ams_id`/`tray_id`. Bambu identifiers are
    /// stored in Spoolman with quotes, which the printer rejects.
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        ams_id: i64,
        tray_id: i64,
        color: Option<&str>,
        material: impl Into<String>,
        brand: impl Into<String>,
        temps: (i64, i64),
        tray_info_idx: Option<&str>,
        cali_idx: Option<&str>,
        bambu_setting_id: Option<&str>,
    ) -> Self {
        Self {
            ams_id,
            tray_id,
            color: color.filter(|c| !c.is_empty()).unwrap_or(DEFAULT_COLOR).to_string(),
            nozzle_temp_min: temps.0,
            nozzle_temp_max: temps.1,
            material: material.into(),
            brand: brand.into(),
            tray_info_idx: Some(tray_info_idx.map(strip_quotes).unwrap_or_default()),
            cali_idx: Some(cali_idx.map(strip_quotes).unwrap_or_else(|| "-1".to_string())),
            bambu_setting_id: bambu_setting_id.map(strip_quotes),
        }
    }
}

/// Payload of `setSpoolmanSettings`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpoolmanSettings {
    pub filament_id: i64,
    pub tray_info_idx: String,
    pub setting_id: String,
    pub cali_idx: String,
    pub temp_min: String,
    pub temp_max: String,
}

/// `tagType` of a `writeNfcTag` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    Spool,
    Location,
}

/// Payload of a `writeNfcTag` request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagPayload {
    Spool(SpoolTag),
    Location { location: String },
}

/// Spool tag layout. Temperatures and id travel as strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpoolTag {
    pub color_hex: String,
    #[serde(rename = "type")]
    pub material: String,
    pub min_temp: String,
    pub max_temp: String,
    pub brand: String,
    pub sm_id: String,
}

impl SpoolTag {
    pub fn new(
        spool_id: i64,
        material: impl Into<String>,
        brand: impl Into<String>,
        color_hex: Option<&str>,
        temps: Option<(i64, i64)>,
    ) -> Self {
        let (min, max) = temps.unwrap_or(DEFAULT_NOZZLE_TEMPS);
        Self {
            color_hex: color_hex.filter(|c| !c.is_empty()).unwrap_or(DEFAULT_COLOR).to_string(),
            material: material.into(),
            min_temp: min.to_string(),
            max_temp: max.to_string(),
            brand: brand.into(),
            sm_id: spool_id.to_string(),
        }
    }
}

/// Scale commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScaleAction {
    Tare,
    Calibrate,
    SetAutoTare,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoonrakerSettings {
    pub url: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrintFarmerSettings {
    pub url: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "printerId")]
    pub printer_id: String,
}

/// Color sent when the spool has none
pub const DEFAULT_COLOR: &str = "FFFFFF";

/// Nozzle range assumed when the spool has none
pub const DEFAULT_NOZZLE_TEMPS: (i64, i64) = (175, 275);

fn strip_quotes(s: &str) -> String {
    s.replace(['\'', '"'], "").trim().to_string()
}

// ─────────────────────────────────────────────────────────────────
// Lenient Field Readers
// ─────────────────────────────────────────────────────────────────

fn as_loose_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_loose_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_loose_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn de_loose_i64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    let v = Value::deserialize(d)?;
    match v {
        Value::Null => Ok(None),
        Value::String(ref s) if s.is_empty() || s == "null" => Ok(None),
        other => as_loose_i64(&other)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected an integer, got {}", other))),
    }
}

fn de_loose_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(as_loose_string(&v))
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
