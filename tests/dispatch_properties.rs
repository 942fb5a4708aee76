use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use smsgate::clock::{elapsed_between, LeaseClock, ManualClock};
use smsgate::dispatch::{
    DispatchConfig, DispatchQueue, MessageStatus, ReportOutcome, ReportedStatus,
};

const TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
enum Op {
    Submit,
    Lease(usize),
    Report(usize, ReportedStatus),
    Advance(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::Submit),
        3 => (0usize..3).prop_map(Op::Lease),
        2 => (0usize..16, prop_oneof![
            Just(ReportedStatus::Sent),
            Just(ReportedStatus::Delivered),
            Just(ReportedStatus::Failed),
        ])
            .prop_map(|(index, status)| Op::Report(index, status)),
        1 => (0u64..90).prop_map(Op::Advance),
    ]
}

/// The id `lease_next` should hand out: the first message in arrival order
/// that is queued or whose lease has run out.
fn expected_lease(queue: &DispatchQueue, clock: &ManualClock) -> Option<String> {
    let now = clock.now();
    queue
        .messages()
        .find(|m| match m.status {
            MessageStatus::Queued => true,
            MessageStatus::Leased => m
                .lease_started_at
                .is_some_and(|started| elapsed_between(started, now) >= clock.lease_timeout()),
            _ => false,
        })
        .map(|m| m.id.clone())
}

proptest! {
    #[test]
    fn queue_invariants_hold_under_random_operations(
        ops in prop::collection::vec(op_strategy(), 1..80)
    ) {
        let clock = ManualClock::at_epoch_secs(1_700_000_000, Duration::from_secs(TIMEOUT_SECS));
        let mut queue = DispatchQueue::new(DispatchConfig::default(), Arc::new(clock.clone()));

        let mut submitted: Vec<String> = Vec::new();
        let mut finished: HashSet<String> = HashSet::new();
        let mut failures: HashMap<String, u32> = HashMap::new();

        for op in ops {
            match op {
                Op::Submit => submitted.push(queue.submit("+15550000000", "body")),
                Op::Lease(device) => {
                    let expected = expected_lease(&queue, &clock);
                    let device_id = format!("d{device}");
                    let leased = queue.lease_next(&device_id);
                    prop_assert_eq!(leased.as_ref().map(|m| m.id.clone()), expected);
                    if let Some(message) = leased {
                        prop_assert!(!finished.contains(&message.id));
                        prop_assert_eq!(message.status, MessageStatus::Leased);
                        prop_assert_eq!(message.lease_holder.as_deref(), Some(device_id.as_str()));
                    }
                }
                Op::Report(index, status) => {
                    let Some(id) = submitted.get(index).cloned() else { continue };
                    let outcome = queue.report_status(&id, status, None).expect("permissive report");
                    match outcome {
                        ReportOutcome::Applied(MessageStatus::Queued) => {
                            *failures.entry(id.clone()).or_default() += 1;
                        }
                        ReportOutcome::Applied(_) => {
                            finished.insert(id.clone());
                        }
                        ReportOutcome::Ignored => {
                            prop_assert!(finished.contains(&id) || !queue.history().contains(&id));
                        }
                    }
                }
                Op::Advance(secs) => clock.advance(Duration::from_secs(secs)),
            }

            let active: Vec<_> = queue.messages().collect();
            prop_assert_eq!(active.len(), submitted.len() - finished.len());
            prop_assert_eq!(queue.queue_depth(), active.len());

            let ids: HashSet<_> = active.iter().map(|m| m.id.as_str()).collect();
            prop_assert_eq!(ids.len(), active.len());

            for message in &active {
                prop_assert!(message.status.is_active());
                prop_assert_eq!(
                    message.lease_holder.is_some(),
                    message.status == MessageStatus::Leased
                );
                prop_assert_eq!(
                    message.retry_count,
                    failures.get(&message.id).copied().unwrap_or(0)
                );
            }

            for id in &finished {
                let record = queue.history().get(id).expect("finished message in history");
                prop_assert!(!record.status.is_active());
                prop_assert!(queue.get(id).is_none());
            }
        }
    }

    #[test]
    fn leases_follow_arrival_order(count in 1usize..20) {
        let clock = ManualClock::at_epoch_secs(1_700_000_000, Duration::from_secs(TIMEOUT_SECS));
        let mut queue = DispatchQueue::new(DispatchConfig::default(), Arc::new(clock));
        let submitted: Vec<String> = (0..count)
            .map(|n| queue.submit("+15550000000", format!("message {n}")))
            .collect();

        let leased: Vec<String> = (0..count)
            .map(|n| queue.lease_next(&format!("d{n}")).expect("leasable").id)
            .collect();

        prop_assert_eq!(leased, submitted);
        prop_assert!(queue.lease_next("late").is_none());
    }
}
