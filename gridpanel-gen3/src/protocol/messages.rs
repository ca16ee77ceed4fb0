//! Message shapes spoken over the G3 RPC channel.
//!
//! Payloads are field-tagged per [`super::wire`]; the tables below document
//! the nesting each parser walks. Only the fields named here are read,
//! everything else is skipped for forward compatibility.

use super::wire::{
    first_bytes, first_varint, put_bytes_field, put_string_field, put_varint_field, FieldReader,
};
use crate::data::CircuitMetrics;
use gridpanel_error::PanelResult;

// Trait ids reserved by the panel's trait-handler service.
pub const TRAIT_BREAKER_GROUPS: u64 = 15;
pub const TRAIT_CIRCUIT_NAMES: u64 = 16;
pub const TRAIT_BREAKER_CONFIG: u64 = 17;
pub const TRAIT_POWER_METRICS: u64 = 26;
pub const TRAIT_RELAY_STATE: u64 = 27;
pub const TRAIT_BREAKER_PARAMS: u64 = 31;

pub const VENDOR_ID: u64 = 1;
pub const PRODUCT_PANEL: u64 = 4;
pub const PRODUCT_GATEWAY: u64 = 5;

/// The main feed is always instance 1 of the power-metrics trait.
pub const MAIN_FEED_IID: u64 = 1;

/// Below this voltage a breaker reads as off.
pub const BREAKER_OFF_VOLTAGE_MV: f64 = 5000.0;

// Scaling between raw wire integers and engineering units.
const MILLI: f64 = 1000.0;
const HALF_MILLI: f64 = 2000.0;

/// Raw instance-id lists discovered from a `GetInstances` response,
/// deduplicated and sorted, plus the panel resource identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceLists {
    pub name_iids: Vec<u64>,
    pub metric_iids: Vec<u64>,
    pub panel_resource_id: String,
}

/// Parse a `GetInstances` response.
///
/// | path                  | meaning                        |
/// |-----------------------|--------------------------------|
/// | 1 (repeated)          | instance entry                 |
/// | 1.1                   | trait info                     |
/// | 1.1.2                 | external view                  |
/// | 1.1.2.1.1             | resource id (string)           |
/// | 1.1.2.2.1.{1,2,3}     | vendor, product, trait         |
/// | 1.1.2.2.2.1           | instance id                    |
pub fn parse_instances(payload: &[u8]) -> PanelResult<InstanceLists> {
    let mut lists = InstanceLists::default();

    for field in FieldReader::new(payload) {
        let (num, value) = field?;
        if num != 1 {
            continue;
        }
        let Some(entry) = value.as_bytes() else { continue };
        let Some(trait_info) = first_bytes(entry, 1)? else { continue };
        let Some(external) = first_bytes(trait_info, 2)? else { continue };

        if lists.panel_resource_id.is_empty() {
            if let Some(resource) = first_bytes(external, 1)? {
                if let Some(rid) = first_bytes(resource, 1)? {
                    lists.panel_resource_id = String::from_utf8_lossy(rid).into_owned();
                }
            }
        }

        let Some(inner) = first_bytes(external, 2)? else { continue };
        let Some(meta) = first_bytes(inner, 1)? else { continue };
        let vendor = first_varint(meta, 1)?.unwrap_or(0);
        let trait_id = first_varint(meta, 3)?.unwrap_or(0);

        let instance_id = match first_bytes(inner, 2)? {
            Some(instance) => first_varint(instance, 1)?.unwrap_or(0),
            None => 0,
        };

        if vendor != VENDOR_ID || instance_id == 0 {
            continue;
        }
        match trait_id {
            TRAIT_CIRCUIT_NAMES => lists.name_iids.push(instance_id),
            TRAIT_POWER_METRICS if instance_id != MAIN_FEED_IID => {
                lists.metric_iids.push(instance_id)
            }
            _ => {}
        }
    }

    lists.name_iids.sort_unstable();
    lists.name_iids.dedup();
    lists.metric_iids.sort_unstable();
    lists.metric_iids.dedup();
    Ok(lists)
}

/// Build a `GetRevision` request for the naming trait of one instance.
///
/// | path        | meaning                                  |
/// |-------------|------------------------------------------|
/// | 1.{1,2,3,4} | vendor, product, trait, version (=1)     |
/// | 2.1.1       | resource id (string)                     |
/// | 2.2.1       | instance id                              |
/// | 3.1.2.1     | resource id again, request metadata side |
pub fn build_revision_request(resource_id: &str, name_iid: u64) -> Vec<u8> {
    let mut meta = Vec::new();
    put_varint_field(&mut meta, 1, VENDOR_ID);
    put_varint_field(&mut meta, 2, PRODUCT_PANEL);
    put_varint_field(&mut meta, 3, TRAIT_CIRCUIT_NAMES);
    put_varint_field(&mut meta, 4, 1);

    let mut resource_msg = Vec::new();
    put_string_field(&mut resource_msg, 1, resource_id);

    let mut iid_msg = Vec::new();
    put_varint_field(&mut iid_msg, 1, name_iid);

    let mut instance_meta = Vec::new();
    put_bytes_field(&mut instance_meta, 1, &resource_msg);
    put_bytes_field(&mut instance_meta, 2, &iid_msg);

    let mut request_metadata = Vec::new();
    put_bytes_field(&mut request_metadata, 2, &resource_msg);
    let mut revision_request = Vec::new();
    put_bytes_field(&mut revision_request, 1, &request_metadata);

    let mut out = Vec::new();
    put_bytes_field(&mut out, 1, &meta);
    put_bytes_field(&mut out, 2, &instance_meta);
    put_bytes_field(&mut out, 3, &revision_request);
    out
}

/// Extract the circuit name out of a `GetRevision` response.
///
/// | path      | meaning           |
/// |-----------|-------------------|
/// | 3.2.1.4   | name (string)     |
pub fn parse_revision_name(payload: &[u8]) -> PanelResult<Option<String>> {
    let Some(sr) = first_bytes(payload, 3)? else { return Ok(None) };
    let Some(body) = first_bytes(sr, 2)? else { return Ok(None) };
    let Some(raw) = first_bytes(body, 1)? else { return Ok(None) };
    let Some(name) = first_bytes(raw, 4)? else { return Ok(None) };
    Ok(Some(String::from_utf8_lossy(name).trim().to_string()))
}

/// One decoded stream notification: which metric instance it addresses and
/// the raw metric payloads it carries.
#[derive(Debug)]
pub struct Notification<'a> {
    pub trait_id: u64,
    pub instance_id: u64,
    pub metrics: Vec<&'a [u8]>,
}

/// Parse a `Subscribe` stream notification.
///
/// | path          | meaning                   |
/// |---------------|---------------------------|
/// | 1.2.2.1.3     | trait id                  |
/// | 1.2.2.2.1     | instance id               |
/// | 2.3.3 (rep.)  | raw metric payloads       |
pub fn parse_notification(payload: &[u8]) -> PanelResult<Option<Notification<'_>>> {
    let Some(rti) = first_bytes(payload, 1)? else { return Ok(None) };
    let Some(ext) = first_bytes(rti, 2)? else { return Ok(None) };
    let Some(info) = first_bytes(ext, 2)? else { return Ok(None) };
    let Some(meta) = first_bytes(info, 1)? else { return Ok(None) };
    let trait_id = first_varint(meta, 3)?.unwrap_or(0);

    let instance_id = match first_bytes(info, 2)? {
        Some(instance) => first_varint(instance, 1)?.unwrap_or(0),
        None => 0,
    };

    let mut metrics = Vec::new();
    if let Some(notify) = first_bytes(payload, 2)? {
        for field in FieldReader::new(notify) {
            let (num, value) = field?;
            if num != 3 {
                continue;
            }
            let Some(metric_list) = value.as_bytes() else { continue };
            for inner in FieldReader::new(metric_list) {
                let (inner_num, inner_value) = inner?;
                if inner_num == 3 {
                    if let Some(raw) = inner_value.as_bytes() {
                        metrics.push(raw);
                    }
                }
            }
        }
    }

    Ok(Some(Notification {
        trait_id,
        instance_id,
        metrics,
    }))
}

#[derive(Debug, Clone, Copy, Default)]
struct MinMaxAvg {
    avg: u64,
}

/// Leaf statistics triplet: 1 = min, 2 = max, 3 = avg. Only the average is
/// projected into snapshots.
fn min_max_avg(data: &[u8]) -> PanelResult<MinMaxAvg> {
    Ok(MinMaxAvg {
        avg: first_varint(data, 3)?.unwrap_or(0),
    })
}

fn avg_scaled(parent: &[u8], field: u32, scale: f64) -> PanelResult<Option<f64>> {
    match first_bytes(parent, field)? {
        Some(stats) => Ok(Some(min_max_avg(stats)?.avg as f64 / scale)),
        None => Ok(None),
    }
}

/// Decode single-phase (120 V) metrics.
///
/// | field | meaning          | scale  |
/// |-------|------------------|--------|
/// | 1     | current stats    | 1/1000 |
/// | 2     | voltage stats    | 1/1000 |
/// | 3     | real power       | 1/2000 |
/// | 4     | apparent power   | 1/2000 |
/// | 5     | reactive power   | 1/2000 |
pub fn decode_single_phase(data: &[u8]) -> PanelResult<CircuitMetrics> {
    let mut metrics = CircuitMetrics::default();
    if let Some(v) = avg_scaled(data, 1, MILLI)? {
        metrics.current_a = v;
    }
    if let Some(v) = avg_scaled(data, 2, MILLI)? {
        metrics.voltage_v = v;
    }
    if let Some(v) = avg_scaled(data, 3, HALF_MILLI)? {
        metrics.power_w = v;
    }
    if let Some(v) = avg_scaled(data, 4, HALF_MILLI)? {
        metrics.apparent_power_va = v;
    }
    if let Some(v) = avg_scaled(data, 5, HALF_MILLI)? {
        metrics.reactive_power_var = v;
    }
    metrics.is_on = metrics.voltage_v * MILLI > BREAKER_OFF_VOLTAGE_MV;
    Ok(metrics)
}

/// Decode dual-phase (240 V) metrics.
///
/// | field | meaning                                   |
/// |-------|-------------------------------------------|
/// | 1     | leg A block {1: current, 2: voltage}      |
/// | 2     | leg B block {1: current, 2: voltage}      |
/// | 3     | combined {2: V, 3: W, 4: VA, 5: var, 6: pf} |
/// | 4     | frequency stats                           |
pub fn decode_dual_phase(data: &[u8]) -> PanelResult<CircuitMetrics> {
    let mut metrics = CircuitMetrics::default();

    if let Some(leg_a) = first_bytes(data, 1)? {
        if let Some(v) = avg_scaled(leg_a, 1, MILLI)? {
            metrics.current_a_a = v;
        }
        if let Some(v) = avg_scaled(leg_a, 2, MILLI)? {
            metrics.voltage_a_v = v;
        }
    }
    if let Some(leg_b) = first_bytes(data, 2)? {
        if let Some(v) = avg_scaled(leg_b, 1, MILLI)? {
            metrics.current_b_a = v;
        }
        if let Some(v) = avg_scaled(leg_b, 2, MILLI)? {
            metrics.voltage_b_v = v;
        }
    }
    if let Some(combined) = first_bytes(data, 3)? {
        if let Some(v) = avg_scaled(combined, 2, MILLI)? {
            metrics.voltage_v = v;
        }
        if let Some(v) = avg_scaled(combined, 3, HALF_MILLI)? {
            metrics.power_w = v;
        }
        if let Some(v) = avg_scaled(combined, 4, HALF_MILLI)? {
            metrics.apparent_power_va = v;
        }
        if let Some(v) = avg_scaled(combined, 5, HALF_MILLI)? {
            metrics.reactive_power_var = v;
        }
        if let Some(v) = avg_scaled(combined, 6, HALF_MILLI)? {
            metrics.power_factor = v;
        }
    }
    if let Some(v) = avg_scaled(data, 4, MILLI)? {
        metrics.frequency_hz = v;
    }

    metrics.current_a = metrics.current_a_a + metrics.current_b_a;
    metrics.is_on = metrics.voltage_v * MILLI > BREAKER_OFF_VOLTAGE_MV;
    Ok(metrics)
}

/// Largest non-zero varint found at `target_field` anywhere in the nested
/// sub-messages of `data`. The main-feed block buries its power average at
/// varying depths between firmware revisions.
fn deepest_value(data: &[u8], target_field: u32) -> u64 {
    let mut best = 0;
    for field in FieldReader::new(data) {
        let Ok((num, value)) = field else { break };
        match value.as_bytes() {
            Some(inner) if !inner.is_empty() => {
                best = best.max(deepest_value(inner, target_field));
            }
            _ => {
                if num == target_field {
                    if let Some(v) = value.as_varint() {
                        best = best.max(v);
                    }
                }
            }
        }
    }
    best
}

/// Decode main-feed metrics. The payload nests deeper than circuit metrics:
///
/// | path    | meaning                         |
/// |---------|---------------------------------|
/// | 14.1    | leg A block                     |
/// | 14.2    | leg B block                     |
/// | x.2.2.3 | leg voltage average (millivolt) |
/// | x.3     | leg power stats (half-milli)    |
/// | x.4.3   | frequency average (millihertz)  |
pub fn decode_main_feed(data: &[u8]) -> PanelResult<CircuitMetrics> {
    let mut metrics = CircuitMetrics::default();
    let Some(main) = first_bytes(data, 14)? else {
        return Ok(metrics);
    };

    if let Some(leg_a) = first_bytes(main, 1)? {
        if let Some(power_stats) = first_bytes(leg_a, 3)? {
            metrics.power_w = deepest_value(power_stats, 3) as f64 / HALF_MILLI;
        }
        if let Some(voltage_stats) = first_bytes(leg_a, 2)? {
            if let Some(inner) = first_bytes(voltage_stats, 2)? {
                let v = first_varint(inner, 3)?.unwrap_or(0);
                if v > 0 {
                    metrics.voltage_a_v = v as f64 / MILLI;
                }
            }
        }
        if let Some(freq_stats) = first_bytes(leg_a, 4)? {
            let v = first_varint(freq_stats, 3)?.unwrap_or(0);
            if v > 0 {
                metrics.frequency_hz = v as f64 / MILLI;
            }
        }
    }

    if let Some(leg_b) = first_bytes(main, 2)? {
        if let Some(power_stats) = first_bytes(leg_b, 3)? {
            let power = deepest_value(power_stats, 3) as f64 / HALF_MILLI;
            if power > 0.0 {
                metrics.power_w += power;
            }
        }
        if let Some(voltage_stats) = first_bytes(leg_b, 2)? {
            if let Some(inner) = first_bytes(voltage_stats, 2)? {
                let v = first_varint(inner, 3)?.unwrap_or(0);
                if v > 0 {
                    metrics.voltage_b_v = v as f64 / MILLI;
                }
            }
        }
    }

    // Split-phase service voltage: sum of legs, or doubled leg A when the
    // panel reports a single symmetric leg.
    metrics.voltage_v = if metrics.voltage_b_v > 0.0 {
        metrics.voltage_a_v + metrics.voltage_b_v
    } else {
        metrics.voltage_a_v * 2.0
    };
    if metrics.voltage_v > 0.0 {
        metrics.current_a = metrics.power_w / metrics.voltage_v;
    }
    metrics.is_on = true;
    Ok(metrics)
}
