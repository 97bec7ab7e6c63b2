pub mod resolver;
pub mod source;

use std::collections::BTreeMap;
use std::time::Duration;

use crate::gate::GateError;

/// One policy object (spec.md §6 "Policy object") — cluster-scoped,
/// selected per node by label match and tie-broken by priority.
#[derive(Debug, Clone)]
pub struct PolicySpec {
    pub name: String,
    pub node_selector: BTreeMap<String, String>,
    pub priority: i64,
    pub namespace_exclusions: Vec<String>,
    pub throttle_config: ThrottleConfig,
}

#[derive(Debug, Clone, Default)]
pub struct ThrottleConfig {
    pub rate_limit: Option<RateLimitConfig>,
    pub max_concurrent: Option<MaxConcurrentConfig>,
    pub cpu: Option<LoadGateConfig>,
    pub io: Option<LoadGateConfig>,
    pub load_avg: Option<LoadAvgConfig>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub fill_period: Duration,
    pub burst: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MaxConcurrentConfig {
    pub absolute: u32,
    pub per_core: f64,
}

#[derive(Debug, Clone)]
pub struct LoadGateConfig {
    pub max_load: f64,
    pub increment_by: f64,
}

#[derive(Debug, Clone)]
pub struct LoadAvgConfig {
    pub max_load: f64,
    pub per_core: bool,
    pub increment_by: f64,
}

/// Wire-format policy object (spec.md §6 "Policy object") as it arrives from
/// a `PolicySource` — throttle values that spec.md types as duration/decimal
/// strings are still strings here, unparsed.
#[derive(Debug, Clone, Default)]
pub struct WirePolicySpec {
    pub name: String,
    pub node_selector: BTreeMap<String, String>,
    pub priority: i64,
    pub namespace_exclusions: Vec<String>,
    pub throttle_config: WireThrottleConfig,
}

#[derive(Debug, Clone, Default)]
pub struct WireThrottleConfig {
    pub rate_limit: Option<WireRateLimitConfig>,
    pub max_concurrent: Option<WireMaxConcurrentConfig>,
    pub cpu: Option<WireLoadGateConfig>,
    pub io: Option<WireLoadGateConfig>,
    pub load_avg: Option<WireLoadAvgConfig>,
}

#[derive(Debug, Clone)]
pub struct WireRateLimitConfig {
    pub fill_factor: String,
    pub burst: u32,
}

#[derive(Debug, Clone, Default)]
pub struct WireMaxConcurrentConfig {
    pub value: u32,
    /// Decimal string. Empty means "not set" (spec.md §6's `omitempty`
    /// fields collapse the Go zero value and "absent" together).
    pub per_core: String,
}

#[derive(Debug, Clone)]
pub struct WireLoadGateConfig {
    pub max_load: f64,
    pub increment_by: f64,
}

#[derive(Debug, Clone)]
pub struct WireLoadAvgConfig {
    pub max_load: f64,
    pub per_core: bool,
    pub increment_by: f64,
}

/// Parse a wire policy into its typed form, or `GateError::ConfigParse`
/// naming the malformed sub-block. A malformed duration/decimal anywhere in
/// the throttle config fails the whole policy (spec.md §7 `CONFIG_PARSE`:
/// "malformed duration/decimal in a policy block; fatal for that policy,
/// skip it and log") — the caller is expected to skip this policy and keep
/// evaluating the rest, not propagate the error further.
pub fn parse_policy(wire: &WirePolicySpec) -> Result<PolicySpec, GateError> {
    let rate_limit = wire
        .throttle_config
        .rate_limit
        .as_ref()
        .map(|r| {
            let fill_period = parse_duration(&r.fill_factor).ok_or_else(|| {
                GateError::ConfigParse(format!(
                    "rateLimit.fillFactor {:?} is not a valid duration",
                    r.fill_factor
                ))
            })?;
            Ok(RateLimitConfig {
                fill_period,
                burst: r.burst,
            })
        })
        .transpose()?;

    let max_concurrent = wire
        .throttle_config
        .max_concurrent
        .as_ref()
        .map(|m| {
            let per_core = if m.per_core.trim().is_empty() {
                0.0
            } else {
                parse_decimal(&m.per_core).ok_or_else(|| {
                    GateError::ConfigParse(format!(
                        "maxConcurrent.perCore {:?} is not a valid decimal",
                        m.per_core
                    ))
                })?
            };
            Ok(MaxConcurrentConfig {
                absolute: m.value,
                per_core,
            })
        })
        .transpose()?;

    let cpu = wire
        .throttle_config
        .cpu
        .as_ref()
        .map(|c| parse_load_gate("cpu", c.max_load, c.increment_by))
        .transpose()?;

    let io = wire
        .throttle_config
        .io
        .as_ref()
        .map(|c| parse_load_gate("io", c.max_load, c.increment_by))
        .transpose()?;

    let load_avg = wire
        .throttle_config
        .load_avg
        .as_ref()
        .map(|l| {
            let gate = parse_load_gate("loadAvg", l.max_load, l.increment_by)?;
            Ok(LoadAvgConfig {
                max_load: gate.max_load,
                per_core: l.per_core,
                increment_by: gate.increment_by,
            })
        })
        .transpose()?;

    Ok(PolicySpec {
        name: wire.name.clone(),
        node_selector: wire.node_selector.clone(),
        priority: wire.priority,
        namespace_exclusions: wire.namespace_exclusions.clone(),
        throttle_config: ThrottleConfig {
            rate_limit,
            max_concurrent,
            cpu,
            io,
            load_avg,
        },
    })
}

fn parse_load_gate(field: &str, max_load: f64, increment_by: f64) -> Result<LoadGateConfig, GateError> {
    if max_load.is_sign_negative() && max_load != 0.0 {
        return Err(GateError::ConfigParse(format!(
            "{field}.maxLoad {max_load} must be non-negative"
        )));
    }
    if increment_by.is_sign_negative() && increment_by != 0.0 {
        return Err(GateError::ConfigParse(format!(
            "{field}.incrementBy {increment_by} must be non-negative"
        )));
    }
    Ok(LoadGateConfig {
        max_load,
        increment_by,
    })
}

/// Check whether `node_labels` satisfies every key/value pair in
/// `selector` (AND semantics, spec.md §6).
pub fn selector_matches(selector: &BTreeMap<String, String>, node_labels: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| node_labels.get(k).is_some_and(|actual| actual == v))
}

/// Parse a Go-style duration string (`ns|µs|ms|s|m|h` suffix, spec.md §6).
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let split_at = text.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (value, unit) = text.split_at(split_at);
    let value: f64 = value.parse().ok()?;
    if value < 0.0 {
        return None;
    }
    let nanos = match unit {
        "ns" => value,
        "µs" | "us" => value * 1_000.0,
        "ms" => value * 1_000_000.0,
        "s" => value * 1_000_000_000.0,
        "m" => value * 60_000_000_000.0,
        "h" => value * 3_600_000_000_000.0,
        _ => return None,
    };
    Some(Duration::from_nanos(nanos as u64))
}

/// Parse a non-negative fixed-point decimal string (spec.md §6).
pub fn parse_decimal(text: &str) -> Option<f64> {
    let value: f64 = text.trim().parse().ok()?;
    if value.is_sign_negative() && value != 0.0 {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_empty_selector_always() {
        let selector = BTreeMap::new();
        let labels = BTreeMap::from([("zone".to_string(), "a".to_string())]);
        assert!(selector_matches(&selector, &labels));
    }

    #[test]
    fn selector_matches_requires_all_keys() {
        let selector = BTreeMap::from([
            ("zone".to_string(), "a".to_string()),
            ("tier".to_string(), "gpu".to_string()),
        ]);
        let labels = BTreeMap::from([("zone".to_string(), "a".to_string())]);
        assert!(!selector_matches(&selector, &labels));
    }

    #[test]
    fn parse_duration_handles_each_unit() {
        assert_eq!(parse_duration("100ms"), Some(Duration::from_millis(100)));
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn parse_duration_rejects_unknown_unit() {
        assert_eq!(parse_duration("5days"), None);
    }

    #[test]
    fn parse_duration_rejects_empty() {
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn parse_decimal_accepts_plain_number() {
        assert_eq!(parse_decimal("0.5"), Some(0.5));
    }

    #[test]
    fn parse_decimal_rejects_negative() {
        assert_eq!(parse_decimal("-1"), None);
    }

    fn wire(name: &str) -> WirePolicySpec {
        WirePolicySpec {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn parse_policy_accepts_a_fully_populated_config() {
        let mut p = wire("p1");
        p.throttle_config.rate_limit = Some(WireRateLimitConfig {
            fill_factor: "100ms".to_string(),
            burst: 5,
        });
        p.throttle_config.max_concurrent = Some(WireMaxConcurrentConfig {
            value: 0,
            per_core: "0.5".to_string(),
        });

        let parsed = parse_policy(&p).expect("well-formed config parses");
        assert_eq!(
            parsed.throttle_config.rate_limit.unwrap().fill_period,
            Duration::from_millis(100)
        );
        assert_eq!(parsed.throttle_config.max_concurrent.unwrap().per_core, 0.5);
    }

    #[test]
    fn parse_policy_rejects_malformed_fill_factor() {
        let mut p = wire("p1");
        p.throttle_config.rate_limit = Some(WireRateLimitConfig {
            fill_factor: "not-a-duration".to_string(),
            burst: 5,
        });

        let err = parse_policy(&p).unwrap_err();
        assert!(matches!(err, crate::gate::GateError::ConfigParse(_)));
    }

    #[test]
    fn parse_policy_rejects_malformed_per_core_decimal() {
        let mut p = wire("p1");
        p.throttle_config.max_concurrent = Some(WireMaxConcurrentConfig {
            value: 0,
            per_core: "lots".to_string(),
        });

        let err = parse_policy(&p).unwrap_err();
        assert!(matches!(err, crate::gate::GateError::ConfigParse(_)));
    }

    #[test]
    fn parse_policy_rejects_negative_load_thresholds() {
        let mut p = wire("p1");
        p.throttle_config.cpu = Some(WireLoadGateConfig {
            max_load: -1.0,
            increment_by: 0.0,
        });

        let err = parse_policy(&p).unwrap_err();
        assert!(matches!(err, crate::gate::GateError::ConfigParse(_)));
    }

    #[test]
    fn parse_policy_with_no_sub_blocks_is_a_gate_free_policy() {
        let p = wire("p1");
        let parsed = parse_policy(&p).unwrap();
        assert!(parsed.throttle_config.rate_limit.is_none());
        assert!(parsed.throttle_config.max_concurrent.is_none());
    }
}
