use tosemu_bridge::testing::FakeTos;
use tosemu_bridge::{Bridge, BridgeConfig, BridgeError, ConfigError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[test]
fn empty_document_gives_defaults() {
    let config: BridgeConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, BridgeConfig::default());
}

#[test]
fn partial_document_overrides_named_fields() {
    let config: BridgeConfig = serde_json::from_str(
        r#"{
            "cycle_budget": 2500,
            "bus_error_addresses": [16775746],
            "enforce_tree_depth": true
        }"#,
    )
    .unwrap();

    assert_eq!(config.cycle_budget, 2500);
    assert_eq!(config.bus_error_addresses, vec![0x00FF_FA42]);
    assert!(config.enforce_tree_depth);
    assert_eq!(config.callback_stack_bytes, 4096);
    config.validate().unwrap();
}

#[test]
fn unknown_fields_are_rejected() {
    let err = serde_json::from_str::<BridgeConfig>(r#"{ "cycles": 1 }"#).unwrap_err();
    assert!(err.to_string().contains("unknown field"), "{err}");
}

#[test]
fn serialized_defaults_parse_back() {
    let json = serde_json::to_string(&BridgeConfig::default()).unwrap();
    let config: BridgeConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(config, BridgeConfig::default());
}

#[test]
fn bridge_refuses_invalid_config() {
    init_tracing();
    let config = BridgeConfig {
        interrupt_stack_bytes: 8,
        ..Default::default()
    };
    let err = Bridge::new(FakeTos::new(), config).err().unwrap();
    assert!(matches!(
        err,
        BridgeError::Config(ConfigError::StackTooSmall {
            stack: "interrupt",
            bytes: 8,
            ..
        })
    ));
}

#[test]
fn bridge_reports_host_allocation_failure() {
    init_tracing();
    let config = BridgeConfig {
        scratch_arena_bytes: 0x40_0000,
        ..Default::default()
    };
    let err = Bridge::new(FakeTos::new(), config).err().unwrap();
    assert!(matches!(
        err,
        BridgeError::HostAllocation {
            purpose: "scratch stacks",
            ..
        }
    ));
}
