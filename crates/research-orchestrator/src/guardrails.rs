use serde_json::Value;

use research_core::{EngineConfig, GuardrailFlags, InstitutionalSnapshot, MomentumMetrics};

/// Label fragments that count as distribution pressure.
const SELLING_LABELS: &[&str] = &["減碼", "賣出", "弱勢"];

pub fn derive_flags(
    momentum: Option<&MomentumMetrics>,
    institutional: Option<&InstitutionalSnapshot>,
    severe_threshold: f64,
) -> GuardrailFlags {
    let severe_momentum = momentum
        .map(|m| m.score <= severe_threshold)
        .unwrap_or(false);
    let selling_pressure = institutional
        .map(|i| SELLING_LABELS.iter().any(|l| i.signal.label.contains(l)))
        .unwrap_or(false);
    GuardrailFlags {
        severe_momentum,
        selling_pressure,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Post-LLM clamp on the target price. Weak signals tighten the band; high
/// model confidence disables the clamp. Returns whether a clamp was applied.
pub fn apply_target_guardrails(
    analysis: &mut Value,
    current_price: f64,
    flags: GuardrailFlags,
    config: &EngineConfig,
) -> bool {
    if current_price <= 0.0 {
        return false;
    }
    let Some(action) = analysis.get_mut("action") else {
        return false;
    };
    let confidence = action
        .get("confidence")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    if confidence == "high" {
        return false;
    }
    let Some(target) = action.get("target_price").and_then(Value::as_f64) else {
        return false;
    };

    let weak = flags.severe_momentum || flags.selling_pressure;
    let (floor_mult, cap_mult) = if weak {
        (config.weak_signal_target_floor, config.weak_signal_target_cap)
    } else {
        (
            config.llm_target_min_multiplier,
            config.llm_target_max_multiplier,
        )
    };
    let floor = current_price * floor_mult;
    let cap = current_price * cap_mult;
    if target >= floor && target <= cap {
        return false;
    }

    let clamped = round2(target.clamp(floor, cap));
    action["target_price"] = serde_json::json!(clamped);

    let note = if weak {
        format!(
            "target price clamped to [{:.2}, {:.2}] on weak momentum/institutional signals (was {:.2})",
            floor, cap, target
        )
    } else {
        format!(
            "target price clamped to [{:.2}, {:.2}] market-sanity bounds (was {:.2})",
            floor, cap, target
        )
    };
    action["guardrail_note"] = serde_json::json!(note);

    let notice = format!("（目標價已依市場合理區間調整為 {clamped:.2}）");
    let rationale = action
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    action["rationale"] = serde_json::json!(format!("{rationale}{notice}"));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::{HoldingsSignal, Trend};
    use serde_json::json;

    fn momentum_with_score(score: f64) -> MomentumMetrics {
        MomentumMetrics {
            score,
            trend: Trend::Neutral,
            trend_label: "中性".to_string(),
            returns: Default::default(),
            moving_averages: Default::default(),
            rsi14: None,
            atr14: None,
            volume_ratio: None,
            price_vs_ma: Default::default(),
            etf: None,
            reference_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        }
    }

    fn institutional_with_label(net: f64) -> InstitutionalSnapshot {
        InstitutionalSnapshot {
            signal: HoldingsSignal::from_net_shares(net),
            ..Default::default()
        }
    }

    #[test]
    fn flags_follow_momentum_and_ownership() {
        let weak = momentum_with_score(10.0);
        let selling = institutional_with_label(-100.0);
        let flags = derive_flags(Some(&weak), Some(&selling), 20.0);
        assert!(flags.severe_momentum);
        assert!(flags.selling_pressure);

        let fine = momentum_with_score(55.0);
        let buying = institutional_with_label(100.0);
        let flags = derive_flags(Some(&fine), Some(&buying), 20.0);
        assert!(!flags.severe_momentum);
        assert!(!flags.selling_pressure);

        let flags = derive_flags(None, None, 20.0);
        assert!(!flags.severe_momentum && !flags.selling_pressure);
    }

    #[test]
    fn weak_signals_cap_at_125_percent() {
        let config = EngineConfig::default();
        let current = 100.0;
        let mut analysis = json!({
            "action": {"rating": "BUY", "target_price": 200.0, "confidence": "medium", "rationale": "看多"}
        });
        let flags = GuardrailFlags {
            severe_momentum: true,
            selling_pressure: true,
        };
        let clamped = apply_target_guardrails(&mut analysis, current, flags, &config);
        assert!(clamped);
        assert_eq!(analysis["action"]["target_price"], json!(125.0));
        assert!(analysis["action"]["guardrail_note"].is_string());
        assert!(analysis["action"]["rationale"]
            .as_str()
            .unwrap()
            .contains("目標價"));
    }

    #[test]
    fn weak_signals_floor_at_80_percent() {
        let config = EngineConfig::default();
        let mut analysis = json!({
            "action": {"rating": "SELL", "target_price": 40.0, "confidence": "low", "rationale": ""}
        });
        let flags = GuardrailFlags {
            severe_momentum: true,
            selling_pressure: false,
        };
        assert!(apply_target_guardrails(&mut analysis, 100.0, flags, &config));
        assert_eq!(analysis["action"]["target_price"], json!(80.0));
    }

    #[test]
    fn normal_band_is_wider() {
        let config = EngineConfig::default();
        let mut analysis = json!({
            "action": {"rating": "BUY", "target_price": 170.0, "confidence": "medium"}
        });
        let flags = GuardrailFlags::default();
        // 170 is inside [60, 180]: untouched.
        assert!(!apply_target_guardrails(&mut analysis, 100.0, flags, &config));
        assert_eq!(analysis["action"]["target_price"], json!(170.0));

        let mut analysis = json!({
            "action": {"rating": "BUY", "target_price": 250.0, "confidence": "medium"}
        });
        assert!(apply_target_guardrails(&mut analysis, 100.0, flags, &config));
        assert_eq!(analysis["action"]["target_price"], json!(180.0));
    }

    #[test]
    fn high_confidence_disables_clamp() {
        let config = EngineConfig::default();
        let mut analysis = json!({
            "action": {"rating": "BUY", "target_price": 500.0, "confidence": "high"}
        });
        let flags = GuardrailFlags {
            severe_momentum: true,
            selling_pressure: true,
        };
        assert!(!apply_target_guardrails(&mut analysis, 100.0, flags, &config));
        assert_eq!(analysis["action"]["target_price"], json!(500.0));
    }

    #[test]
    fn missing_target_is_a_no_op() {
        let config = EngineConfig::default();
        let mut analysis = json!({"action": {"rating": "HOLD"}});
        assert!(!apply_target_guardrails(
            &mut analysis,
            100.0,
            GuardrailFlags::default(),
            &config
        ));
    }
}
