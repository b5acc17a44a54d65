use serde_json::Value;

use vigil_model::Signal;

/// Coerce a signal value onto the `[0, 100]` scale.
///
/// Numbers clamp, booleans become 100/0, anything else is discarded along
/// with its weight.
fn coerce(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v.clamp(0.0, 100.0)),
        Value::Bool(true) => Some(100.0),
        Value::Bool(false) => Some(0.0),
        _ => None,
    }
}

/// Weighted mean of the coercible signals; an empty (or fully discarded)
/// list scores zero.
pub fn score(signals: &[Signal]) -> f64 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for signal in signals {
        if signal.weight <= 0.0 {
            continue;
        }
        if let Some(value) = coerce(&signal.value) {
            weighted += value * signal.weight;
            total_weight += signal.weight;
        }
    }
    if total_weight == 0.0 {
        0.0
    } else {
        (weighted / total_weight).clamp(0.0, 100.0)
    }
}
