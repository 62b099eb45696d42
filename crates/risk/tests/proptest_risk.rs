use chrono::Utc;
use common::{
    IndicatorSnapshot, IntentReason, OpenPosition, OrderConstraints, Position, PositionState,
    Signal, SignalKind,
};
use proptest::prelude::*;
use risk::{position_size, RiskConfig, RiskContext, RiskDecision, RiskManager};

fn signal(kind: SignalKind, close: f64) -> Signal {
    Signal {
        kind,
        timestamp: Utc::now(),
        snapshot: IndicatorSnapshot {
            fast_ema: close,
            slow_ema: close,
            stoch_rsi: 50.0,
            stoch_rsi_d: 50.0,
            close,
            timestamp: Utc::now(),
        },
    }
}

fn any_kind() -> impl Strategy<Value = SignalKind> {
    prop_oneof![
        Just(SignalKind::None),
        Just(SignalKind::EnterLong),
        Just(SignalKind::ExitLong),
    ]
}

proptest! {
    /// Sizing on arbitrary inputs never panics and stays within venue limits.
    #[test]
    fn sizing_respects_venue_constraints(
        equity in 0.0f64..10_000_000.0,
        price in 0.0001f64..1_000_000.0,
        risk in 0.001f64..0.2,
        stop in 0.001f64..0.5,
        min_size in 0.0001f64..1.0,
        span in 0.0f64..1000.0,
        increment in prop_oneof![Just(0.0), Just(0.0001), Just(0.01), Just(1.0)],
    ) {
        let config = RiskConfig {
            max_risk_per_trade: risk,
            stop_loss_pct: stop,
            max_position_fraction: 1.0,
            ..RiskConfig::default()
        };
        let limits = OrderConstraints {
            min_size,
            max_size: min_size + span,
            size_increment: increment,
            price_increment: 0.01,
        };

        let qty = position_size(equity, price, &config, &limits);
        prop_assert!(qty.is_finite());
        prop_assert!(qty >= 0.0);
        if qty > 0.0 {
            prop_assert!(qty >= limits.min_size);
            prop_assert!(qty <= limits.max_size);
        }
    }

    /// A breached stop-loss wins over any signal.
    #[test]
    fn stop_loss_precedes_every_signal(
        entry in 1.0f64..100_000.0,
        breach in 0.0f64..0.5,
        kind in any_kind(),
    ) {
        let manager = RiskManager::new(RiskConfig::default());
        let stop = entry * 0.98;
        let price = stop * (1.0 - breach);
        let position = Position {
            pair: "TESTUSDT".into(),
            state: PositionState::Open(OpenPosition {
                entry_price: entry,
                quantity: 1.0,
                stop_loss_price: stop,
                take_profit_price: entry * 1.04,
                opened_at: Utc::now(),
                entry_order_id: "e".into(),
            }),
        };
        let limits = OrderConstraints {
            min_size: 0.0001,
            max_size: 1_000.0,
            size_increment: 0.0001,
            price_increment: 0.01,
        };
        let ctx = RiskContext {
            position: &position,
            price,
            equity: 10_000.0,
            constraints: &limits,
            open_positions: 1,
            max_concurrent_positions: 5,
            halted: false,
        };

        match manager.evaluate(&signal(kind, price), &ctx) {
            RiskDecision::Submit(intent) => {
                prop_assert_eq!(intent.reason, IntentReason::StopLoss);
                prop_assert_eq!(intent.quantity, 1.0);
            }
            other => prop_assert!(false, "expected stop-loss exit, got {:?}", other),
        }
    }
}

#[test]
fn partial_toml_falls_back_to_defaults() {
    let config: RiskConfig = toml::from_str(
        r#"
        max_risk_per_trade = 0.02
        entry_order = "limit"
        "#,
    )
    .unwrap();
    assert_eq!(config.max_risk_per_trade, 0.02);
    assert_eq!(config.entry_order, risk::EntryOrderType::Limit);
    assert_eq!(config.stop_loss_pct, 0.02);
    assert!(config.flatten_on_halt);
}
