//! Report shapes emitted by gpsd and their static field tables.
//!
//! Each shape is a plain serde struct plus an ordered table of
//! `(wire key, kind, help, accessor)` entries. The projector walks the table
//! instead of inspecting the struct, so adding a field to a shape is a one-line
//! change in the `record!` invocation below and automatically yields a new
//! metric.
//!
//! Field semantics follow <https://gpsd.io/gpsd_json.html>.

use serde::Deserialize;

/// Semantic type of a report field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Boolean,
    Number,
    Text,
    Satellites,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Boolean => "boolean",
            FieldKind::Number => "number",
            FieldKind::Text => "text",
            FieldKind::Satellites => "satellites",
        }
    }
}

/// A field value borrowed from a decoded report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Boolean(bool),
    Number(f64),
    Text(&'a str),
    Satellites(&'a [Satellite]),
}

impl FieldValue<'_> {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Boolean(_) => FieldKind::Boolean,
            FieldValue::Number(_) => FieldKind::Number,
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Satellites(_) => FieldKind::Satellites,
        }
    }
}

/// One entry of a shape's field table.
pub struct Field<R> {
    /// JSON key as sent by gpsd; also the metric name suffix.
    pub key: &'static str,
    pub kind: FieldKind,
    /// Human readable description, used as the metric help text.
    pub help: &'static str,
    /// Reads this field out of a decoded report.
    pub get: for<'a> fn(&'a R) -> FieldValue<'a>,
}

impl<R> std::fmt::Debug for Field<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A gpsd report shape with a static field table.
pub trait Record: for<'de> Deserialize<'de> + 'static {
    /// Metric namespace, e.g. `tpv` in `gpsd_tpv_lat`.
    const NAMESPACE: &'static str;

    /// Fields in declaration order.
    fn fields() -> &'static [Field<Self>];
}

/// POLL arrays the exporter knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Tpv,
    Sky,
    Gst,
    Pps,
    Toff,
    Osc,
}

impl Shape {
    pub const ALL: [Shape; 6] = [
        Shape::Tpv,
        Shape::Sky,
        Shape::Gst,
        Shape::Pps,
        Shape::Toff,
        Shape::Osc,
    ];

    /// Map a POLL object key to its shape.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|shape| shape.as_str() == key)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Tpv => Tpv::NAMESPACE,
            Shape::Sky => Sky::NAMESPACE,
            Shape::Gst => Gst::NAMESPACE,
            Shape::Pps => Pps::NAMESPACE,
            Shape::Toff => Toff::NAMESPACE,
            Shape::Osc => Osc::NAMESPACE,
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// POLL keys that carry bookkeeping rather than reports.
pub const POLL_BOOKKEEPING_KEYS: [&str; 3] = ["class", "active", "time"];

/// Wire key of the satellite identifier, used as the `prn` label.
pub const SATELLITE_ID_KEY: &str = "PRN";

/// The only text field that is projected (as epoch nanoseconds).
pub const TIME_KEY: &str = "time";

macro_rules! field_type {
    (Boolean) => { bool };
    (Number) => { f64 };
    (Text) => { String };
    (Satellites) => { Vec<Satellite> };
}

macro_rules! field_value {
    (Boolean, $r:ident . $field:ident) => { FieldValue::Boolean($r.$field) };
    (Number, $r:ident . $field:ident) => { FieldValue::Number($r.$field) };
    (Text, $r:ident . $field:ident) => { FieldValue::Text(&$r.$field) };
    (Satellites, $r:ident . $field:ident) => { FieldValue::Satellites(&$r.$field) };
}

/// Declare a report struct together with its field table.
macro_rules! record {
    (
        $(#[$meta:meta])*
        $name:ident => $namespace:literal {
            $( $kind:ident $key:literal $field:ident : $help:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Deserialize)]
        #[serde(default)]
        pub struct $name {
            $(
                #[doc = $help]
                #[serde(rename = $key)]
                pub $field: field_type!($kind),
            )*
        }

        impl Record for $name {
            const NAMESPACE: &'static str = $namespace;

            fn fields() -> &'static [Field<Self>] {
                static FIELDS: &[Field<$name>] = &[
                    $(
                        {
                            fn get(r: &$name) -> FieldValue<'_> {
                                field_value!($kind, r.$field)
                            }
                            Field {
                                key: $key,
                                kind: FieldKind::$kind,
                                help: $help,
                                get,
                            }
                        },
                    )*
                ];
                FIELDS
            }
        }
    };
}

record! {
    /// TPV: time, position and velocity report.
    Tpv => "tpv" {
        Text "device" device: "Name of the originating device",
        Number "mode" mode: "NMEA mode: 0=unknown, 1=no fix, 2=2D, 3=3D",
        Number "status" status: "GPS fix status: 0=Unknown, 1=Normal, 2=DGPS, 3=RTK Fixed, 4=RTK Floating, 5=DR, 6=GNSSDR, 7=Time (surveyed), 8=Simulated, 9=P(Y)",
        Text "time" time: "Time/date stamp in ISO8601 format, UTC, as nanoseconds since the Unix epoch",
        Number "altHAE" alt_hae: "Altitude, height above ellipsoid, in meters. Probably WGS84",
        Number "altMSL" alt_msl: "MSL altitude in meters. altMSL is altHAE minus geoidSep",
        Number "climb" climb: "Climb (positive) or sink (negative) rate, meters per second",
        Text "datum" datum: "Current datum. Hopefully WGS84",
        Number "depth" depth: "Depth in meters. Probably depth below the keel",
        Number "dgpsAge" dgps_age: "Age of DGPS data in seconds",
        Number "dgpsSta" dgps_station: "Station of DGPS data",
        Number "epc" epc: "Estimated climb error in meters per second. Certainty unknown",
        Number "epd" epd: "Estimated track (direction) error in degrees. Certainty unknown",
        Number "eph" eph: "Estimated horizontal position (2D) error in meters. Certainty unknown",
        Number "eps" eps: "Estimated speed error in meters per second. Certainty unknown",
        Number "ept" ept: "Estimated time stamp error in seconds. Certainty unknown",
        Number "epx" epx: "Longitude error estimate in meters. Certainty unknown",
        Number "epy" epy: "Latitude error estimate in meters. Certainty unknown",
        Number "epv" epv: "Estimated vertical error in meters. Certainty unknown",
        Number "geoidSep" geoid_sep: "Geoid separation between the WGS84 reference ellipsoid and the geoid (mean sea level) in meters",
        Number "lat" lat: "Latitude in degrees: +/- signifies North/South",
        Number "leapseconds" leap_seconds: "Current leap seconds",
        Number "lon" lon: "Longitude in degrees: +/- signifies East/West",
        Number "track" track: "Course over ground, degrees from true north",
        Number "magtrack" mag_track: "Course over ground, degrees magnetic",
        Number "magvar" mag_var: "Magnetic variation in degrees. Positive is West variation, negative is East variation",
        Number "speed" speed: "Speed over ground, meters per second",
        Number "ecefx" ecef_x: "ECEF X position in meters",
        Number "ecefy" ecef_y: "ECEF Y position in meters",
        Number "ecefz" ecef_z: "ECEF Z position in meters",
        Number "ecefpAcc" ecef_p_acc: "ECEF position error in meters. Certainty unknown",
        Number "ecefvx" ecef_vx: "ECEF X velocity in meters per second",
        Number "ecefvy" ecef_vy: "ECEF Y velocity in meters per second",
        Number "ecefvz" ecef_vz: "ECEF Z velocity in meters per second",
        Number "ecefvAcc" ecef_v_acc: "ECEF velocity error in meters per second. Certainty unknown",
        Number "sep" sep: "Estimated spherical (3D) position error in meters. Certainty unknown",
        Number "relD" rel_d: "Down component of relative position vector in meters",
        Number "relE" rel_e: "East component of relative position vector in meters",
        Number "relN" rel_n: "North component of relative position vector in meters",
        Number "velD" vel_d: "Down velocity component in meters per second",
        Number "velE" vel_e: "East velocity component in meters per second",
        Number "velN" vel_n: "North velocity component in meters per second",
        Number "wanglem" wind_angle_magnetic: "Wind angle magnetic in degrees",
        Number "wangler" wind_angle_relative: "Wind angle relative in degrees",
        Number "wanglet" wind_angle_true: "Wind angle true in degrees",
        Number "wspeedr" wind_speed_relative: "Wind speed relative in meters per second",
        Number "wspeedt" wind_speed_true: "Wind speed true in meters per second",
    }
}

record! {
    /// SKY: satellite sky view with dilution of precision figures.
    Sky => "sky" {
        Text "device" device: "Name of originating device",
        Number "nSat" n_sat: "Number of satellite objects in the satellites array",
        Number "gdop" gdop: "Geometric (hyperspherical) dilution of precision, a combination of PDOP and TDOP",
        Number "hdop" hdop: "Horizontal dilution of precision",
        Number "pdop" pdop: "Position (spherical/3D) dilution of precision",
        Number "prRes" pr_res: "Pseudorange residue in meters",
        Number "qual" qual: "Quality indicator: 0=no signal, 1=searching, 2=acquired, 3=detected but unusable, 4=code locked and time synchronized, 5-7=code and carrier locked and time synchronized",
        Satellites "satellites" satellites: "List of satellite objects in skyview",
        Number "tdop" tdop: "Time dilution of precision",
        Text "time" time: "Time/date stamp in ISO8601 format, UTC, as nanoseconds since the Unix epoch",
        Number "uSat" u_sat: "Number of satellites used in navigation solution",
        Number "vdop" vdop: "Vertical (altitude) dilution of precision",
        Number "xdop" xdop: "Longitudinal dilution of precision",
        Number "ydop" ydop: "Latitudinal dilution of precision",
    }
}

record! {
    /// A single satellite inside a SKY report.
    Satellite => "sat" {
        Number "PRN" prn: "PRN ID of the satellite. 1-63 are GNSS satellites, 64-96 are GLONASS satellites, 100-164 are SBAS satellites",
        Number "az" azimuth: "Azimuth, degrees from true north",
        Number "el" elevation: "Elevation in degrees",
        Number "ss" signal_strength: "Signal to noise ratio in dBHz",
        Boolean "used" used: "Used in current solution",
        Number "gnssid" gnss_id: "The GNSS ID as defined by u-blox: 0=GPS, 2=Galileo, 3=Beidou, 5=QZSS, 6=GLONASS",
        Number "svid" sv_id: "The satellite ID within its constellation, as defined by u-blox",
        Number "sigid" sig_id: "The signal ID of this signal, as defined by u-blox",
        Number "freqid" freq_id: "GLONASS frequency ID of the signal (frequency slot plus 7)",
        Number "health" health: "The health of this satellite: 0=unknown, 1=OK, 2=unhealthy",
    }
}

record! {
    /// GST: pseudorange noise report.
    Gst => "gst" {
        Text "device" device: "Name of originating device",
        Text "time" time: "Time/date stamp in ISO8601 format, UTC, as nanoseconds since the Unix epoch",
        Number "rms" rms: "Standard deviation of the range inputs to the navigation process",
        Number "major" major: "Standard deviation of semi-major axis of error ellipse, in meters",
        Number "minor" minor: "Standard deviation of semi-minor axis of error ellipse, in meters",
        Number "orient" orient: "Orientation of semi-major axis of error ellipse, in degrees from true north",
        Number "lat" lat: "Standard deviation of latitude error, in meters",
        Number "lon" lon: "Standard deviation of longitude error, in meters",
        Number "alt" alt: "Standard deviation of altitude error, in meters",
    }
}

record! {
    /// TOFF: offset between the GPS clock and the system clock.
    Toff => "toff" {
        Text "device" device: "Name of the originating device",
        Number "real_sec" real_sec: "Seconds from the GPS clock",
        Number "real_nsec" real_nsec: "Nanoseconds from the GPS clock",
        Number "clock_sec" clock_sec: "Seconds from the system clock",
        Number "clock_nsec" clock_nsec: "Nanoseconds from the system clock",
    }
}

record! {
    /// PPS: pulse per second report.
    Pps => "pps" {
        Text "device" device: "Name of the originating device",
        Number "real_sec" real_sec: "Seconds from the PPS source",
        Number "real_nsec" real_nsec: "Nanoseconds from the PPS source",
        Number "clock_sec" clock_sec: "Seconds from the system clock",
        Number "clock_nsec" clock_nsec: "Nanoseconds from the system clock",
        Number "precision" precision: "NTP style estimate of PPS precision",
        Text "shm" shm: "shm key of this PPS",
        Number "qErr" q_err: "Quantization error of the PPS, in picoseconds",
    }
}

record! {
    /// OSC: disciplined oscillator status.
    Osc => "osc" {
        Text "device" device: "Name of the originating device",
        Boolean "running" running: "If true, the oscillator is currently running",
        Boolean "reference" reference: "If true, the oscillator is receiving a GPS PPS signal",
        Boolean "disciplined" disciplined: "If true, the GPS PPS signal is being used to discipline the local oscillator",
        Number "delta" delta: "Time difference in nanoseconds between the oscillator PPS output pulse and the most recent GPS PPS input pulse",
    }
}
