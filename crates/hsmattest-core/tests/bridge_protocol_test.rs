//! Request protocol tests for the module memory bridge.
//!
//! Every test ends with no outstanding regions: each `write` and each
//! produced result is given back exactly once.

use hsmattest_core::module::DEFAULT_LOG_IMPORT;
use hsmattest_core::{
    BridgeError, Limits, MemoryBridge, MemorySink, ModuleHandle, ParseAbi, ParseOutcome,
    RegionKind, RequestState,
};

const ECHO: &str = include_str!("fixtures/echo_parser.wat");
const ECHO_RETURN_AREA: &str = include_str!("fixtures/echo_parser_retarea.wat");
const FAILING_ALLOC: &str = include_str!("fixtures/failing_alloc.wat");

fn bridge_with(wat: &str, limits: Limits) -> (MemoryBridge, MemorySink) {
    let handle = ModuleHandle::from_bytes(wat.as_bytes(), DEFAULT_LOG_IMPORT).unwrap();
    let sink = MemorySink::new();
    let bridge = MemoryBridge::instantiate(&handle, Box::new(sink.clone()), &limits).unwrap();
    (bridge, sink)
}

fn bridge(wat: &str) -> (MemoryBridge, MemorySink) {
    bridge_with(wat, Limits::default())
}

#[test]
fn test_full_request_returns_to_idle() {
    let (mut bridge, sink) = bridge(ECHO);
    assert_eq!(bridge.state(), RequestState::Idle);

    let input = bridge.write(b"[]").unwrap();
    assert_eq!(bridge.state(), RequestState::BufferWritten);
    assert_eq!(input.kind(), RegionKind::Input);
    assert_eq!(input.length(), 2);

    let ParseOutcome::Produced(result) = bridge.invoke_parse(&input).unwrap() else {
        panic!("echo module must produce a result");
    };
    assert_eq!(bridge.state(), RequestState::Parsed);
    assert_eq!(result.kind(), RegionKind::Result);
    assert_eq!(bridge.read(&result).unwrap(), b"[]");

    bridge.release(result).unwrap();
    assert_eq!(bridge.state(), RequestState::ResultReleased);
    bridge.release(input).unwrap();
    assert_eq!(bridge.state(), RequestState::Idle);
    assert_eq!(bridge.outstanding(), 0);

    let stats = bridge.stats();
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.releases, 2);
    assert_eq!(stats.parses, 1);
    assert_eq!(stats.parse_failures, 0);
    assert_eq!(stats.log_lines, 1);
    assert_eq!(stats.cstrings_released, 1);
    assert_eq!(sink.texts(), vec!["parse invoked".to_string()]);
}

#[test]
fn test_written_bytes_are_visible_to_module() {
    let (mut bridge, _) = bridge(ECHO);
    let payload = br#"[{"pairs":{"Serial Number":"12345"}}]"#;

    let input = bridge.write(payload).unwrap();
    assert_eq!(bridge.read(&input).unwrap(), payload);
    bridge.release(input).unwrap();
    assert_eq!(bridge.state(), RequestState::Idle);
}

#[test]
fn test_repeated_requests_reuse_instance() {
    let (mut bridge, sink) = bridge(ECHO);

    for round in 0..5u8 {
        let payload = vec![b'a' + round; 100 * (round as usize + 1)];
        let input = bridge.write(&payload).unwrap();
        let echoed = match bridge.invoke_parse(&input).unwrap() {
            ParseOutcome::Produced(result) => {
                bridge.scoped(result, |bridge, result| bridge.read(result)).unwrap()
            }
            ParseOutcome::Failed => panic!("round {round}: unexpected failure"),
        };
        bridge.release(input).unwrap();

        assert_eq!(echoed, payload);
        assert_eq!(bridge.state(), RequestState::Idle);
        assert_eq!(bridge.outstanding(), 0);
    }

    assert_eq!(bridge.stats().parses, 5);
    assert_eq!(sink.lines().len(), 5);
}

#[test]
fn test_large_input_grows_module_memory() {
    let (mut bridge, _) = bridge(ECHO);
    let before = bridge.memory_size();
    let payload = vec![b'x'; 256 * 1024];

    let input = bridge.write(&payload).unwrap();
    assert!(bridge.memory_size() > before);
    bridge.release(input).unwrap();
}

#[test]
fn test_zero_length_result_is_parse_failure() {
    let (mut bridge, _) = bridge(ECHO);

    let input = bridge.write(b"!not an attestation").unwrap();
    let outcome = bridge.invoke_parse(&input).unwrap();
    assert_eq!(outcome, ParseOutcome::Failed);
    assert_eq!(bridge.state(), RequestState::ParseFailed);

    bridge.release(input).unwrap();
    assert_eq!(bridge.state(), RequestState::Idle);

    let stats = bridge.stats();
    assert_eq!(stats.parse_failures, 1);
    assert_eq!(stats.allocations, stats.releases);
}

#[test]
fn test_empty_input_is_written_and_fails_parse() {
    let (mut bridge, _) = bridge(ECHO);

    let input = bridge.write(&[]).unwrap();
    assert_eq!(input.length(), 0);
    assert_eq!(bridge.invoke_parse(&input).unwrap(), ParseOutcome::Failed);
    bridge.release(input).unwrap();
    assert_eq!(bridge.state(), RequestState::Idle);
}

#[test]
fn test_operations_out_of_sequence_are_rejected() {
    let (mut bridge, _) = bridge(ECHO);

    let input = bridge.write(b"abc").unwrap();
    let err = bridge.write(b"second").unwrap_err();
    assert!(
        matches!(
            err,
            BridgeError::OutOfSequence {
                op: "write",
                state: RequestState::BufferWritten
            }
        ),
        "got {err:?}"
    );

    let ParseOutcome::Produced(result) = bridge.invoke_parse(&input).unwrap() else {
        panic!("echo module must produce a result");
    };
    let err = bridge.invoke_parse(&input).unwrap_err();
    assert!(matches!(err, BridgeError::OutOfSequence { op: "invoke_parse", .. }));

    bridge.release(result).unwrap();
    bridge.release(input).unwrap();
    assert_eq!(bridge.stats().parses, 1);
}

#[test]
fn test_region_from_other_instance_is_rejected() {
    let (mut first, _) = bridge(ECHO);
    let (mut second, _) = bridge(ECHO);

    let foreign = first.write(b"abc").unwrap();
    let own = second.write(b"abc").unwrap();

    let err = second.invoke_parse(&foreign).unwrap_err();
    assert!(matches!(err, BridgeError::ForeignRegion { .. }), "got {err:?}");
    assert_ne!(first.instance_id(), second.instance_id());

    second.release(own).unwrap();
    first.release(foreign).unwrap();
    assert_eq!(first.outstanding() + second.outstanding(), 0);
}

#[test]
fn test_out_of_bounds_result_fails_request() {
    let (mut bridge, _) = bridge(ECHO);

    let input = bridge.write(b"?").unwrap();
    let err = bridge.invoke_parse(&input).unwrap_err();
    assert!(matches!(err, BridgeError::OutOfBounds { .. }), "got {err:?}");
    assert!(err.is_module_fault());
    assert_eq!(bridge.state(), RequestState::ParseFailed);

    bridge.release(input).unwrap();
    assert_eq!(bridge.state(), RequestState::Idle);
}

#[test]
fn test_trap_in_parse_leaves_input_releasable() {
    let (mut bridge, _) = bridge(ECHO);

    let input = bridge.write(b"#boom").unwrap();
    let err = bridge.invoke_parse(&input).unwrap_err();
    assert!(matches!(err, BridgeError::Trap { entry: "parse", .. }), "got {err:?}");

    bridge.release(input).unwrap();
    assert_eq!(bridge.state(), RequestState::Idle);

    // The instance still serves the next request.
    let input = bridge.write(b"[]").unwrap();
    let ParseOutcome::Produced(result) = bridge.invoke_parse(&input).unwrap() else {
        panic!("echo module must produce a result");
    };
    bridge.release(result).unwrap();
    bridge.release(input).unwrap();
}

#[test]
fn test_scoped_releases_on_error() {
    let (mut bridge, _) = bridge(ECHO);

    let input = bridge.write(b"#boom").unwrap();
    let err = bridge
        .scoped(input, |bridge, input| bridge.invoke_parse(input))
        .unwrap_err();
    assert!(matches!(err, BridgeError::Trap { .. }));
    assert_eq!(bridge.outstanding(), 0);
    assert_eq!(bridge.state(), RequestState::Idle);
}

#[test]
fn test_surrendered_input_is_not_released() {
    let (mut bridge, _) = bridge(ECHO);

    let input = bridge.write(b"[]").unwrap();
    let outcome = bridge.invoke_parse(&input).unwrap();
    bridge.surrender(input).unwrap();
    assert_eq!(bridge.state(), RequestState::Parsed);

    let ParseOutcome::Produced(result) = outcome else {
        panic!("echo module must produce a result");
    };
    bridge.release(result).unwrap();
    assert_eq!(bridge.state(), RequestState::Idle);

    let stats = bridge.stats();
    assert_eq!(stats.surrendered, 1);
    assert_eq!(stats.releases, 1);
}

#[test]
fn test_input_limit_is_enforced_before_allocation() {
    let limits = Limits {
        max_input_bytes: 8,
        ..Limits::default()
    };
    let (mut bridge, _) = bridge_with(ECHO, limits);

    let err = bridge.write(&[b'a'; 9]).unwrap_err();
    assert!(matches!(err, BridgeError::InputTooLarge { len: 9, max: 8 }));
    assert_eq!(bridge.state(), RequestState::Idle);
    assert_eq!(bridge.stats().allocations, 0);
}

#[test]
fn test_result_limit_is_enforced_on_read() {
    let limits = Limits {
        max_result_bytes: 4,
        ..Limits::default()
    };
    let (mut bridge, _) = bridge_with(ECHO, limits);

    let input = bridge.write(b"0123456789").unwrap();
    let ParseOutcome::Produced(result) = bridge.invoke_parse(&input).unwrap() else {
        panic!("echo module must produce a result");
    };
    let err = bridge.scoped(result, |bridge, result| bridge.read(result)).unwrap_err();
    assert!(matches!(err, BridgeError::ResultTooLarge { length: 10, max: 4 }));

    bridge.release(input).unwrap();
    assert_eq!(bridge.outstanding(), 0);
}

#[test]
fn test_return_area_convention() {
    let (mut bridge, sink) = bridge(ECHO_RETURN_AREA);

    let input = bridge.write(br#"[{"pairs":{"a":"1"}}]"#).unwrap();
    let ParseOutcome::Produced(result) = bridge.invoke_parse(&input).unwrap() else {
        panic!("echo module must produce a result");
    };
    assert_eq!(bridge.read(&result).unwrap(), br#"[{"pairs":{"a":"1"}}]"#);
    bridge.release(result).unwrap();
    bridge.release(input).unwrap();

    let input = bridge.write(b"!").unwrap();
    assert_eq!(bridge.invoke_parse(&input).unwrap(), ParseOutcome::Failed);
    bridge.release(input).unwrap();

    // input + return area, twice
    let stats = bridge.stats();
    assert_eq!(stats.allocations, 4);
    assert_eq!(stats.releases, 5);
    assert!(sink.lines().is_empty());
    assert_eq!(bridge.state(), RequestState::Idle);
}

#[test]
fn test_allocator_trap_is_reported() {
    let handle = ModuleHandle::from_bytes(FAILING_ALLOC.as_bytes(), DEFAULT_LOG_IMPORT).unwrap();
    assert_eq!(handle.parse_abi(), ParseAbi::MultiValue);
    let mut bridge =
        MemoryBridge::instantiate(&handle, Box::new(MemorySink::new()), &Limits::default())
            .unwrap();

    let err = bridge.write(b"abc").unwrap_err();
    assert!(
        matches!(err, BridgeError::AllocationFailed { size: 3, .. }),
        "got {err:?}"
    );
    assert!(err.is_module_fault());
    assert_eq!(bridge.state(), RequestState::Idle);
    assert_eq!(bridge.outstanding(), 0);
}
