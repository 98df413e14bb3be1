//! Virtual telegram lines computed from wire fields.
//!
//! The meter reports energy per tariff; the reader adds the totals as extra
//! lines with identifiers that do not exist on the wire, so the decoder can
//! treat them like any other field.

/// A line synthesised as the sum of other lines with the same unit.
#[derive(Debug, Clone, Copy)]
pub struct VirtualField {
    pub id: &'static str,
    pub components: &'static [&'static str],
    pub unit: &'static str,
}

pub const TARIFF_TOTALS: &[VirtualField] = &[
    VirtualField {
        id: "1-0:1.8.3",
        components: &["1-0:1.8.1", "1-0:1.8.2"],
        unit: "kWh",
    },
    VirtualField {
        id: "1-0:2.8.3",
        components: &["1-0:2.8.1", "1-0:2.8.2"],
        unit: "kWh",
    },
];

/// Reads `id(<number>*<unit>)` and returns the number.
fn component_value(line: &str, id: &str, unit: &str) -> Option<f64> {
    let rest = line.strip_prefix(id)?.strip_prefix('(')?;
    let (number, tail) = rest.split_once('*')?;
    let tail = tail.trim_end().strip_suffix(')')?;
    if tail != unit {
        return None;
    }
    number.trim().parse().ok()
}

/// Builds the virtual lines for `lines`.
///
/// A virtual field is only produced when at least one of its components is
/// present in the telegram.
pub fn synthesize<S: AsRef<str>>(lines: &[S], fields: &[VirtualField]) -> Vec<String> {
    fields
        .iter()
        .filter_map(|field| {
            let values: Vec<f64> = lines
                .iter()
                .flat_map(|line| {
                    field
                        .components
                        .iter()
                        .filter_map(move |id| component_value(line.as_ref(), id, field.unit))
                })
                .collect();
            if values.is_empty() {
                return None;
            }
            let total: f64 = values.iter().sum();
            Some(format!("{}({:010.3}*{})", field.id, total, field.unit))
        })
        .collect()
}
