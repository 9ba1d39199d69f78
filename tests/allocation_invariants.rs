//! Property checks over arbitrary allocation command sequences: the running
//! total never exceeds 100%, no pledge ever exceeds its owner's ceiling, and
//! rejected commands leave the state untouched.

use proptest::prelude::*;

use sacco_loans::workflows::loan::{
    AllocationState, GuarantorCandidate, MemberId, PERCENT_EPSILON,
};

#[derive(Debug, Clone)]
enum Command {
    Add { candidate: usize },
    Remove { candidate: usize },
    SetPercentage { candidate: usize, value: f64 },
}

fn candidate(index: usize, maximum_percentage: f64) -> GuarantorCandidate {
    GuarantorCandidate {
        id: MemberId(format!("g-{index}")),
        full_name: format!("Guarantor {index}"),
        contact: format!("g-{index}@example.org"),
        available_guarantee_amount: 100_000.0,
        maximum_percentage,
    }
}

fn command_strategy(pool_size: usize) -> impl Strategy<Value = Command> {
    prop_oneof![
        (0..pool_size).prop_map(|candidate| Command::Add { candidate }),
        (0..pool_size).prop_map(|candidate| Command::Remove { candidate }),
        ((0..pool_size), -10.0f64..140.0).prop_map(|(candidate, value)| {
            Command::SetPercentage { candidate, value }
        }),
    ]
}

fn ceilings_strategy(pool_size: usize) -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(1.0f64..100.0, pool_size)
}

proptest! {
    #[test]
    fn invariants_hold_for_any_command_sequence(
        ceilings in ceilings_strategy(5),
        commands in proptest::collection::vec(command_strategy(5), 1..60),
    ) {
        let pool: Vec<GuarantorCandidate> = ceilings
            .iter()
            .enumerate()
            .map(|(index, cap)| candidate(index, *cap))
            .collect();
        let mut allocation = AllocationState::new();

        for command in commands {
            let before = allocation.pledges().to_vec();

            let rejected = match command {
                Command::Add { candidate } => {
                    allocation.add(pool[candidate].clone()).is_err()
                }
                Command::Remove { candidate } => {
                    allocation.remove(&pool[candidate].id).is_err()
                }
                Command::SetPercentage { candidate, value } => {
                    allocation.set_percentage(&pool[candidate].id, value).is_err()
                }
            };

            // Percentage invariant: observable total never exceeds 100.
            prop_assert!(allocation.total_percentage() <= 100.0 + PERCENT_EPSILON);

            // Ceiling invariant: every pledge honors its owner's maximum.
            for pledge in allocation.pledges() {
                prop_assert!(
                    pledge.percentage
                        <= pledge.candidate.maximum_percentage + PERCENT_EPSILON
                );
                prop_assert!(pledge.percentage >= 0.0);
            }

            // Rejections leave the pledge set exactly as it was.
            if rejected {
                prop_assert_eq!(allocation.pledges(), before.as_slice());
            }

            // Readiness is a pure function of the live pledge set.
            let expected_ready = !allocation.pledges().is_empty()
                && (allocation.total_percentage() - 100.0).abs() < PERCENT_EPSILON;
            prop_assert_eq!(allocation.can_submit(), expected_ready);
        }
    }

    #[test]
    fn repeated_adds_never_overshoot_full_coverage(
        ceilings in ceilings_strategy(8),
    ) {
        let mut allocation = AllocationState::new();
        for (index, cap) in ceilings.iter().enumerate() {
            match allocation.add(candidate(index, *cap)) {
                Ok(assigned) => prop_assert!(assigned <= *cap),
                // Only a fully covered allocation may turn a fresh candidate away.
                Err(_) => prop_assert!(allocation.remaining_percentage() < PERCENT_EPSILON),
            }
        }
        prop_assert!(allocation.total_percentage() <= 100.0 + PERCENT_EPSILON);
    }
}
