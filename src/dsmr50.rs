//! Built-in DSMR 5.0 field tables.
//!
//! Columns: description, destination, tag, pattern, type, validation
//! ("1" rejects zero), scale, max emits per hour, HA discovery, HA icon and,
//! for composite lines only, the capture group holding the value.
//!
//! OBIS codes are listed in the Dutch P1 companion standard
//! (Slimme meter 5.0.2, netbeheernederland.nl).

pub type RuleTable = &'static [(&'static str, &'static [&'static str])];

#[rustfmt::skip]
pub const DEFINITION: RuleTable = &[
    ("1-3:0.2.8", &["DSMR Version meter", "system", "dsmr_version", r"^.*\((.*)\)", "int", "0", "1", "12", "1"]),

    // Truncated to the last digits; drop \d{26} for the full serial
    ("0-0:96.1.1", &["Equipment identifier", "elec", "serial", r"^.*\(\d{26}(.*)\)", "str", "1", "1", "60", "1", "mdi:counter"]),
    ("0-0:1.0.0", &["Timestamp [s]", "elec", "timestamp", r"^.*\((\d{12})[SW]\)", "int", "1", "1", "0", "1", "mdi:counter"]),
    ("0-0:96.7.21", &["Number of power failures", "elec", "power_failures", r"^.*\((.*)\)", "int", "0", "1", "12", "1", "mdi:counter"]),
    ("0-0:96.7.9", &["Number of long power failures", "elec", "long_power_failures", r"^.*\((.*)\)", "int", "0", "1", "12", "1", "mdi:counter"]),
    ("0-0:96.14.0", &["Tariff indicator electricity", "elec", "tariff_indicator", r"^.*\((.*)\)", "int", "0", "1", "0", "1", "mdi:counter"]),

    ("1-0:21.7.0", &["Power consumption L1 [W]", "elec", "P_L1_consumed", r"^.*\((.*)\*kW\)", "float", "0", "1000", "60", "0", "mdi:gauge"]),
    ("1-0:41.7.0", &["Power consumption L2 [W]", "elec", "P_L2_consumed", r"^.*\((.*)\*kW\)", "float", "0", "1000", "60", "0", "mdi:gauge"]),
    ("1-0:61.7.0", &["Power consumption L3 [W]", "elec", "P_L3_consumed", r"^.*\((.*)\*kW\)", "float", "0", "1000", "60", "0", "mdi:gauge"]),
    ("1-0:22.7.0", &["Power production L1 [W]", "elec", "P_L1_produced", r"^.*\((.*)\*kW\)", "float", "0", "1000", "60", "0", "mdi:gauge"]),
    ("1-0:42.7.0", &["Power production L2 [W]", "elec", "P_L2_produced", r"^.*\((.*)\*kW\)", "float", "0", "1000", "60", "0", "mdi:gauge"]),
    ("1-0:62.7.0", &["Power production L3 [W]", "elec", "P_L3_produced", r"^.*\((.*)\*kW\)", "float", "0", "1000", "60", "0", "mdi:gauge"]),
    ("1-0:1.7.0", &["Total power consumption [W]", "elec", "P_consumed", r"^.*\((.*)\*kW\)", "float", "0", "1000", "60", "1", "mdi:gauge"]),
    ("1-0:2.7.0", &["Total power production [W]", "elec", "P_produced", r"^.*\((.*)\*kW\)", "float", "0", "1000", "60", "1", "mdi:gauge"]),

    // Capture timestamp, DST flag and reading; the reading is group 3
    ("0-1:24.2.1", &["Gas consumption [m\u{b3}]", "gas", "gas_consumed", r"^.*\((\d{12})([SW])\)\((.*)\*m3\)", "float", "1", "1000", "60", "1", "mdi:counter", "3"]),
    ("0-1:96.1.0", &["Equipment Identifier", "gas", "serial", r"^.*\(\d{26}(.*)\)", "str", "1", "1", "60", "0", "mdi:counter"]),

    ("1-0:1.8.1", &["Electricity consumed (Tariff 1) [Wh]", "elec", "elec_consumed_tar1", r"^.*\((.*)\*kWh\)", "float", "1", "1000", "0", "0", "mdi:counter"]),
    ("1-0:1.8.2", &["Electricity consumed (Tariff 2) [Wh]", "elec", "elec_consumed_tar2", r"^.*\((.*)\*kWh\)", "float", "1", "1000", "0", "0", "mdi:counter"]),
    ("1-0:2.8.1", &["Electricity produced (Tariff 1) [Wh]", "elec", "elec_produced_tar1", r"^.*\((.*)\*kWh\)", "float", "1", "1000", "0", "0", "mdi:counter"]),
    ("1-0:2.8.2", &["Electricity produced (Tariff 2) [Wh]", "elec", "elec_produced_tar2", r"^.*\((.*)\*kWh\)", "float", "1", "1000", "0", "0", "mdi:counter"]),

    // Virtual: not on the wire, injected by the reader as tariff 1 + tariff 2
    ("1-0:1.8.3", &["Electricity consumed [Wh]", "elec", "elec_consumed", r"^.*\((.*)\*kWh\)", "float", "1", "1000", "60", "1", "mdi:counter"]),
    ("1-0:2.8.3", &["Electricity produced [Wh]", "elec", "elec_produced", r"^.*\((.*)\*kWh\)", "float", "1", "1000", "60", "1", "mdi:counter"]),

    ("1-0:32.7.0", &["Voltage L1 [V]", "elec", "V_L1", r"^.*\((.*)\*V\)", "float", "0", "1", "60", "1", "mdi:gauge"]),
    ("1-0:52.7.0", &["Voltage L2 [V]", "elec", "V_L2", r"^.*\((.*)\*V\)", "float", "0", "1", "60", "1", "mdi:gauge"]),
    ("1-0:72.7.0", &["Voltage L3 [V]", "elec", "V_L3", r"^.*\((.*)\*V\)", "float", "0", "1", "60", "1", "mdi:gauge"]),
    ("1-0:31.7.0", &["Current L1 [A]", "elec", "I_L1", r"^.*\((.*)\*A\)", "int", "0", "1", "0", "0", "mdi:gauge"]),
    ("1-0:51.7.0", &["Current L2 [A]", "elec", "I_L2", r"^.*\((.*)\*A\)", "int", "0", "1", "0", "0", "mdi:gauge"]),
    ("1-0:71.7.0", &["Current L3 [A]", "elec", "I_L3", r"^.*\((.*)\*A\)", "int", "0", "1", "0", "0", "mdi:gauge"]),

    ("1-0:32.36.0", &["Voltage swells L1", "elec", "V_L1_swells", r"^.*\((.*)\)", "int", "0", "1", "12", "0", "mdi:gauge"]),
    ("1-0:52.36.0", &["Voltage swells L2", "elec", "V_L2_swells", r"^.*\((.*)\)", "int", "0", "1", "12", "0", "mdi:gauge"]),
    ("1-0:72.36.0", &["Voltage swells L3", "elec", "V_L3_swells", r"^.*\((.*)\)", "int", "0", "1", "12", "0", "mdi:gauge"]),
    ("1-0:32.32.0", &["Voltage sags L1", "elec", "V_L1_sags", r"^.*\((.*)\)", "int", "0", "1", "12", "0", "mdi:gauge"]),
    ("1-0:52.32.0", &["Voltage sags L2", "elec", "V_L2_sags", r"^.*\((.*)\)", "int", "0", "1", "12", "0", "mdi:gauge"]),
    ("1-0:72.32.0", &["Voltage sags L3", "elec", "V_L3_sags", r"^.*\((.*)\)", "int", "0", "1", "12", "0", "mdi:gauge"]),
];

/// Stromnetz Graz (Austria) meters report energy in Wh and power in W, and
/// send combined tariff totals natively.
#[rustfmt::skip]
pub const STROMNETZ_GRAZ: RuleTable = &[
    ("1-3:0.2.8", &["DSMR Version", "system", "dsmr_version", r"^.*\((.*)\)", "int", "0", "1", "12", "0"]),
    ("0-0:1.0.0", &["Zeitstempel [s]", "el", "timestamp", r"^.*\((.*)S\)", "int", "1", "1", "0", "0", "mdi:counter"]),

    ("1-0:1.8.0", &["Wirkenergie Bezug [Wh]", "el", "el_consumed", r"^.*\((.*)\*Wh\)", "float", "1", "1", "60", "1", "mdi:counter"]),
    ("1-0:1.8.1", &["Wirkenergie Bezug (Tarif 1) [Wh]", "el", "el_consumed1", r"^.*\((.*)\*Wh\)", "float", "1", "1", "0", "0", "mdi:counter"]),
    ("1-0:1.8.2", &["Wirkenergie Bezug (Tarif 2) [Wh]", "el", "el_consumed2", r"^.*\((.*)\*Wh\)", "float", "1", "1", "0", "0", "mdi:counter"]),
    ("1-0:1.7.0", &["Momentane Wirkleistung Bezug [W]", "el", "p_consumed", r"^.*\((.*)\*W\)", "float", "0", "1", "60", "1", "mdi:gauge"]),

    ("1-0:2.8.0", &["Wirkenergie Einspeisung [Wh]", "el", "el_returned", r"^.*\((.*)\*Wh\)", "float", "1", "1", "60", "1", "mdi:counter"]),
    ("1-0:2.8.1", &["Wirkenergie Einspeisung (Tarif 1) [Wh]", "el", "el_returned1", r"^.*\((.*)\*Wh\)", "float", "1", "1", "0", "0", "mdi:counter"]),
    ("1-0:2.8.2", &["Wirkenergie Einspeisung (Tarif 2) [Wh]", "el", "el_returned2", r"^.*\((.*)\*Wh\)", "float", "1", "1", "0", "0", "mdi:counter"]),
    ("1-0:2.7.0", &["Momentane Wirkleistung Einspeisung [W]", "el", "p_returned", r"^.*\((.*)\*W\)", "float", "0", "1", "60", "1", "mdi:gauge"]),
];
