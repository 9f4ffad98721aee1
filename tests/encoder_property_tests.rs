use proptest::prelude::*;
use rc_socket::encoder::PulseKind;
use rc_socket::{Action, Protocol, PulseEncoder};

/// Generate code words made of valid symbols only
fn code_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec(prop_oneof![Just('0'), Just('1'), Just('F')], 1..24)
        .prop_map(|chars| chars.into_iter().collect())
}

fn protocol_strategy() -> impl Strategy<Value = Protocol> {
    prop_oneof![
        Just(Protocol::One),
        Just(Protocol::Two),
        Just(Protocol::Three),
        Just(Protocol::Four),
    ]
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![Just(Action::On), Just(Action::Off)]
}

proptest! {
    /// A train holds one sync pulse per repetition plus the leading one,
    /// and two data pulses per symbol per repetition
    #[test]
    fn test_pulse_counts(
        protocol in protocol_strategy(),
        code in code_strategy(),
        repeat in 0u32..16,
        action in action_strategy()
    ) {
        let encoder = PulseEncoder::new(protocol, code.clone(), None, repeat);
        let train = encoder.encode_command(action);
        let word_len = code.len() + 2;

        prop_assert_eq!(train.sync_count(), repeat as usize + 1);
        prop_assert_eq!(train.data_count(), 2 * word_len * repeat as usize);
        prop_assert_eq!(train.len(), train.sync_count() + train.data_count());
        prop_assert_eq!(train.pulses().first().map(|p| p.kind), Some(PulseKind::Sync));
        prop_assert_eq!(train.pulses().last().map(|p| p.kind), Some(PulseKind::Sync));
    }

    /// Encoding the same command twice yields the same train
    #[test]
    fn test_encoding_is_deterministic(
        protocol in protocol_strategy(),
        code in code_strategy(),
        repeat in 0u32..16,
        action in action_strategy()
    ) {
        let encoder = PulseEncoder::new(protocol, code, None, repeat);
        prop_assert_eq!(encoder.encode_command(action), encoder.encode_command(action));
    }

    /// Every pulse is a whole multiple of the pulse unit
    #[test]
    fn test_pulses_scale_with_unit(
        protocol in protocol_strategy(),
        code in code_strategy(),
        unit in 50u32..1000
    ) {
        let encoder = PulseEncoder::new(protocol, code, Some(unit), 2);
        for pulse in encoder.encode_command(Action::On).pulses() {
            prop_assert_eq!(pulse.high_us, unit);
            prop_assert_eq!(pulse.low_us % unit, 0);
        }
    }

    /// On and off words share the code and differ only in the two-symbol suffix
    #[test]
    fn test_on_off_words_differ_in_suffix(
        protocol in protocol_strategy(),
        code in code_strategy()
    ) {
        let encoder = PulseEncoder::new(protocol, code.clone(), None, 8);
        let on = encoder.word(Action::On);
        let off = encoder.word(Action::Off);

        prop_assert!(on.starts_with(&code));
        prop_assert!(off.starts_with(&code));
        prop_assert_eq!(on.len(), code.len() + 2);
        prop_assert_ne!(on, off);
    }

    /// Characters outside the symbol alphabet never produce pulses
    #[test]
    fn test_invalid_characters_are_skipped(
        code in code_strategy(),
        noise in "[a-eg-zA-EG-Z2-9 ]{0,8}"
    ) {
        let encoder = PulseEncoder::new(Protocol::One, "", None, 3);
        let clean = encoder.encode(&code);
        let noisy = encoder.encode(&format!("{noise}{code}{noise}"));
        prop_assert_eq!(clean, noisy);
    }
}
