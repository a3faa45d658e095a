// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Property tests for the frame codec.

use crate::{decode, encode, CommandEnvelope, CommandResult, SchedulerCommand};
use proptest::prelude::*;

fn arb_command() -> impl Strategy<Value = SchedulerCommand> {
    let goal_id = "[a-z0-9]{1,16}".prop_map(|s| format!("goal-{s}"));
    prop_oneof![
        goal_id.clone().prop_map(|id| SchedulerCommand::SubmitGoal { goal_id: id.into() }),
        (goal_id, proptest::option::of(".{0,40}")).prop_map(|(id, reason)| {
            SchedulerCommand::CancelGoal { goal_id: id.into(), reason }
        }),
    ]
}

proptest! {
    #[test]
    fn envelope_round_trips(request_id in "[a-zA-Z0-9-]{1,32}", command in arb_command()) {
        let envelope = CommandEnvelope { request_id, command };
        let bytes = encode(&envelope).unwrap();
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        prop_assert_eq!(len, bytes.len() - 4);
        let back: CommandEnvelope = decode(&bytes[4..]).unwrap();
        prop_assert_eq!(back, envelope);
    }

    #[test]
    fn result_round_trips(request_id in "[a-zA-Z0-9-]{1,32}", success in any::<bool>(),
                          message in proptest::option::of(".{0,60}")) {
        let result = CommandResult { request_id, success, message };
        let bytes = encode(&result).unwrap();
        let back: CommandResult = decode(&bytes[4..]).unwrap();
        prop_assert_eq!(back, result);
    }
}
