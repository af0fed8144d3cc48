//! Family-independent representation of decoded dive data.
//!
//! Per-model parsers turn the raw dive bytes handed out by
//! [`Device::foreach`](crate::Device::foreach) into a stream of [`Sample`]s and a
//! set of whole-dive [`Field`]s.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::error::{DeviceError, Result};

/// Raw gas mix index meaning "not known".
pub const GASMIX_UNKNOWN: u32 = 0xFFFF_FFFF;
/// Raw sensor index meaning "no specific sensor".
pub const SENSOR_NONE: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// Milliseconds since the start of the dive.
    Time(u32),
    Depth(f64),
    Pressure { tank: u32, value: f64 },
    Temperature(f64),
    Event(SampleEvent),
    Rbt(u32),
    Heartbeat(u32),
    Bearing(u32),
    Vendor { kind: u32, data: Vec<u8> },
    Setpoint(f64),
    Ppo2 { sensor: Option<u32>, value: f64 },
    Cns(f64),
    Deco(Deco),
    GasMix(u32),
    /// Time to surface, in seconds.
    Tts(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum EventType {
    None = 0,
    DecoStop,
    Rbt,
    Ascent,
    Ceiling,
    Workload,
    Transmitter,
    Violation,
    Bookmark,
    Surface,
    SafetyStop,
    GasChange,
    SafetyStopVoluntary,
    SafetyStopMandatory,
    DeepStop,
    CeilingSafetyStop,
    Floor,
    DiveTime,
    MaxDepth,
    Olf,
    Po2,
    AirTime,
    Rgbm,
    Heading,
    TissueLevel,
    GasChange2,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, ToPrimitive)]
pub enum Severity {
    #[default]
    Missing = 0,
    State = 1,
    Info = 2,
    Warn = 3,
    Alarm = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, ToPrimitive)]
pub enum Annotation {
    #[default]
    None = 0,
    Interest = 1,
    Navpoint = 2,
    Danger = 3,
    Animal = 4,
    Issue = 5,
    Injury = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventFlags {
    pub begin: bool,
    pub end: bool,
    pub severity: Severity,
    pub annotation: Annotation,
}

impl EventFlags {
    pub const BEGIN: u32 = 1 << 0;
    pub const END: u32 = 1 << 1;
    pub const SEVERITY_SHIFT: u32 = 2;
    pub const SEVERITY_MASK: u32 = 7 << Self::SEVERITY_SHIFT;
    pub const TYPE_SHIFT: u32 = 5;
    pub const TYPE_MASK: u32 = 7 << Self::TYPE_SHIFT;

    /// Packs the flags into the on-the-wire word.
    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.begin {
            bits |= Self::BEGIN;
        }
        if self.end {
            bits |= Self::END;
        }
        bits | (self.severity as u32) << Self::SEVERITY_SHIFT
            | (self.annotation as u32) << Self::TYPE_SHIFT
    }

    pub fn from_bits(bits: u32) -> Result<Self> {
        let unknown = bits & !(Self::BEGIN | Self::END | Self::SEVERITY_MASK | Self::TYPE_MASK);
        if unknown != 0 {
            return Err(DeviceError::invalid(format!(
                "unknown event flag bits {:#x}",
                unknown
            )));
        }

        let severity_raw = (bits & Self::SEVERITY_MASK) >> Self::SEVERITY_SHIFT;
        let severity = Severity::from_u32(severity_raw)
            .ok_or_else(|| DeviceError::invalid(format!("bad event severity {}", severity_raw)))?;

        let type_raw = (bits & Self::TYPE_MASK) >> Self::TYPE_SHIFT;
        let annotation = Annotation::from_u32(type_raw)
            .ok_or_else(|| DeviceError::invalid(format!("bad event type {}", type_raw)))?;

        Ok(EventFlags {
            begin: bits & Self::BEGIN != 0,
            end: bits & Self::END != 0,
            severity,
            annotation,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleEvent {
    pub kind: EventType,
    pub time: u32,
    pub flags: EventFlags,
    pub value: u32,
    pub name: Option<String>,
}

impl SampleEvent {
    /// Builds an event from the raw numeric representation used by parsers.
    pub fn from_raw(kind: u32, time: u32, flags: u32, value: u32) -> Result<Self> {
        let kind = EventType::from_u32(kind)
            .ok_or_else(|| DeviceError::invalid(format!("unknown event type {}", kind)))?;
        Ok(SampleEvent {
            kind,
            time,
            flags: EventFlags::from_bits(flags)?,
            value,
            name: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum DecoType {
    Ndl = 0,
    SafetyStop,
    DecoStop,
    DeepStop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deco {
    pub kind: DecoType,
    /// Stop time or no-deco limit, in seconds.
    pub time: u32,
    pub depth: f64,
    /// Time to surface, in seconds.
    pub tts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum FieldType {
    DiveTime = 0,
    MaxDepth,
    AvgDepth,
    GasMixCount,
    GasMix,
    Salinity,
    Atmospheric,
    TemperatureSurface,
    TemperatureMinimum,
    TemperatureMaximum,
    TankCount,
    Tank,
    DiveMode,
    DecoModel,
    String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Seconds.
    DiveTime(u32),
    MaxDepth(f64),
    AvgDepth(f64),
    GasMixCount(u32),
    GasMix(GasMix),
    Salinity(Salinity),
    Atmospheric(f64),
    TemperatureSurface(f64),
    TemperatureMinimum(f64),
    TemperatureMaximum(f64),
    TankCount(u32),
    Tank(Tank),
    DiveMode(DiveMode),
    DecoModel(DecoModel),
    String { desc: String, value: String },
}

impl Field {
    pub fn kind(&self) -> FieldType {
        match self {
            Field::DiveTime(_) => FieldType::DiveTime,
            Field::MaxDepth(_) => FieldType::MaxDepth,
            Field::AvgDepth(_) => FieldType::AvgDepth,
            Field::GasMixCount(_) => FieldType::GasMixCount,
            Field::GasMix(_) => FieldType::GasMix,
            Field::Salinity(_) => FieldType::Salinity,
            Field::Atmospheric(_) => FieldType::Atmospheric,
            Field::TemperatureSurface(_) => FieldType::TemperatureSurface,
            Field::TemperatureMinimum(_) => FieldType::TemperatureMinimum,
            Field::TemperatureMaximum(_) => FieldType::TemperatureMaximum,
            Field::TankCount(_) => FieldType::TankCount,
            Field::Tank(_) => FieldType::Tank,
            Field::DiveMode(_) => FieldType::DiveMode,
            Field::DecoModel(_) => FieldType::DecoModel,
            Field::String { .. } => FieldType::String,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, ToPrimitive)]
pub enum Usage {
    #[default]
    None = 0,
    Oxygen,
    Diluent,
    Sidemount,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GasMix {
    pub helium: f64,
    pub oxygen: f64,
    pub nitrogen: f64,
    pub usage: Usage,
}

impl GasMix {
    /// Nitrogen makes up whatever oxygen and helium leave.
    pub fn new(oxygen: f64, helium: f64) -> Self {
        GasMix {
            helium,
            oxygen,
            nitrogen: 1.0 - oxygen - helium,
            usage: Usage::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum Water {
    Fresh = 0,
    Salt,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Salinity {
    pub water: Water,
    pub density: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum DiveMode {
    Freedive = 0,
    Gauge,
    OpenCircuit,
    ClosedCircuit,
    SemiClosedCircuit,
}

/// Tank type bits: unit system and closed-circuit role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TankInfo(pub u32);

impl TankInfo {
    pub const NONE: TankInfo = TankInfo(0);
    pub const METRIC: TankInfo = TankInfo(1);
    pub const IMPERIAL: TankInfo = TankInfo(2);
    pub const CC_DILUENT: TankInfo = TankInfo(4);
    pub const CC_O2: TankInfo = TankInfo(8);

    pub fn contains(&self, other: TankInfo) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TankInfo {
    type Output = TankInfo;

    fn bitor(self, rhs: TankInfo) -> TankInfo {
        TankInfo(self.0 | rhs.0)
    }
}

/// Volumes are always water capacity in liters; imperial tanks have already
/// been converted and keep the `IMPERIAL` bit so the original can be recovered.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tank {
    pub gasmix: Option<u32>,
    pub kind: TankInfo,
    pub volume: f64,
    pub workpressure: f64,
    pub beginpressure: f64,
    pub endpressure: f64,
    pub usage: Usage,
}

impl Tank {
    pub fn raw_gasmix(&self) -> u32 {
        self.gasmix.unwrap_or(GASMIX_UNKNOWN)
    }

    pub fn set_raw_gasmix(&mut self, index: u32) {
        self.gasmix = (index != GASMIX_UNKNOWN).then(|| index);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, ToPrimitive)]
pub enum DecoModelType {
    #[default]
    None = 0,
    Buhlmann,
    Vpm,
    Rgbm,
    Dciem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradientFactors {
    pub low: u32,
    pub high: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecoModel {
    pub kind: DecoModelType,
    /// Zero is neutral, positive more conservative.
    pub conservatism: i32,
    pub gf: Option<GradientFactors>,
}

impl Sample {
    pub fn ppo2_raw_sensor(&self) -> Option<u32> {
        match self {
            Sample::Ppo2 { sensor, .. } => Some(sensor.unwrap_or(SENSOR_NONE)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEVERITIES: [Severity; 5] = [
        Severity::Missing,
        Severity::State,
        Severity::Info,
        Severity::Warn,
        Severity::Alarm,
    ];

    const ANNOTATIONS: [Annotation; 7] = [
        Annotation::None,
        Annotation::Interest,
        Annotation::Navpoint,
        Annotation::Danger,
        Annotation::Animal,
        Annotation::Issue,
        Annotation::Injury,
    ];

    #[test]
    fn pack_alarm_injury() {
        let flags = EventFlags {
            begin: true,
            end: false,
            severity: Severity::Alarm,
            annotation: Annotation::Injury,
        };
        assert_eq!(flags.bits(), 1 | 4 << 2 | 6 << 5);
        assert_eq!(EventFlags::from_bits(flags.bits()).unwrap(), flags);
    }

    #[test]
    fn flags_roundtrip_all_combinations() {
        for &begin in &[false, true] {
            for &end in &[false, true] {
                for &severity in &SEVERITIES {
                    for &annotation in &ANNOTATIONS {
                        let flags = EventFlags {
                            begin,
                            end,
                            severity,
                            annotation,
                        };
                        assert_eq!(EventFlags::from_bits(flags.bits()).unwrap(), flags);
                    }
                }
            }
        }
    }

    #[test]
    fn reject_out_of_range_flags() {
        assert!(EventFlags::from_bits(5 << 2).is_err());
        assert!(EventFlags::from_bits(7 << 5).is_err());
        assert!(EventFlags::from_bits(1 << 8).is_err());
    }

    #[test]
    fn event_from_raw() {
        let event = SampleEvent::from_raw(8, 120, 2 << 2, 0).unwrap();
        assert_eq!(event.kind, EventType::Bookmark);
        assert_eq!(event.flags.severity, Severity::Info);
        assert!(SampleEvent::from_raw(99, 0, 0, 0).is_err());
    }

    #[test]
    fn tank_gasmix_sentinel() {
        let mut tank = Tank::default();
        tank.set_raw_gasmix(GASMIX_UNKNOWN);
        assert_eq!(tank.gasmix, None);
        assert_eq!(tank.raw_gasmix(), GASMIX_UNKNOWN);

        tank.set_raw_gasmix(2);
        assert_eq!(tank.gasmix, Some(2));
    }

    #[test]
    fn ppo2_sensor_sentinel() {
        let averaged = Sample::Ppo2 {
            sensor: None,
            value: 1.2,
        };
        assert_eq!(averaged.ppo2_raw_sensor(), Some(SENSOR_NONE));

        let single = Sample::Ppo2 {
            sensor: Some(1),
            value: 1.3,
        };
        assert_eq!(single.ppo2_raw_sensor(), Some(1));
        assert_eq!(Sample::Tts(600).ppo2_raw_sensor(), None);
    }

    #[test]
    fn tank_info_bits() {
        let kind = TankInfo::METRIC | TankInfo::CC_DILUENT;
        assert!(kind.contains(TankInfo::METRIC));
        assert!(kind.contains(TankInfo::CC_DILUENT));
        assert!(!kind.contains(TankInfo::IMPERIAL));
    }

    #[test]
    fn field_kind_matches_variant() {
        let mix = Field::GasMix(GasMix::new(0.32, 0.0));
        assert_eq!(mix.kind(), FieldType::GasMix);

        let deco = Field::DecoModel(DecoModel {
            kind: DecoModelType::Buhlmann,
            conservatism: 0,
            gf: Some(GradientFactors { low: 30, high: 85 }),
        });
        assert_eq!(deco.kind(), FieldType::DecoModel);
    }
}
