//! Phase machine tests

use fabrollout::deploy::fsm::{Phase, PhaseEvent, PhaseMachine};

#[test]
fn test_fsm_initial_state() {
    let fsm = PhaseMachine::new();
    assert_eq!(fsm.phase(), Phase::Pending);
    assert!(fsm.error().is_none());
    assert!(fsm.failed_in().is_none());
}

#[test]
fn test_fsm_minimal_run() {
    let mut fsm = PhaseMachine::new();

    for phase in [
        Phase::PreValidation,
        Phase::CoreDeployment,
        Phase::PostDeployment,
        Phase::FinalValidation,
    ] {
        fsm.process(PhaseEvent::Enter(phase)).unwrap();
        assert_eq!(fsm.phase(), phase);
    }

    fsm.process(PhaseEvent::Complete).unwrap();
    assert_eq!(fsm.phase(), Phase::Completed);
    assert!(!fsm.has_entered(Phase::ServiceMesh));
}

#[test]
fn test_fsm_failure_records_phase_and_error() {
    let mut fsm = PhaseMachine::new();

    fsm.process(PhaseEvent::Enter(Phase::PreValidation)).unwrap();
    fsm.process(PhaseEvent::Enter(Phase::CoreDeployment)).unwrap();
    fsm.process(PhaseEvent::Fail("cluster unreachable".to_string()))
        .unwrap();

    assert_eq!(fsm.phase(), Phase::Failed);
    assert_eq!(fsm.failed_in(), Some(Phase::CoreDeployment));
    assert_eq!(fsm.error(), Some("cluster unreachable"));

    fsm.process(PhaseEvent::Rollback).unwrap();
    assert_eq!(fsm.phase(), Phase::Rollback);
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = PhaseMachine::new();

    // core deployment is mandatory after pre-validation
    fsm.process(PhaseEvent::Enter(Phase::PreValidation)).unwrap();
    assert!(fsm
        .process(PhaseEvent::Enter(Phase::PostDeployment))
        .is_err());

    // completing early is rejected
    assert!(fsm.process(PhaseEvent::Complete).is_err());

    // rollback only follows a failure
    assert!(fsm.process(PhaseEvent::Rollback).is_err());
    assert_eq!(fsm.phase(), Phase::PreValidation);
}

#[test]
fn test_fsm_terminal_phases_reject_failure() {
    let mut fsm = PhaseMachine::new();
    fsm.process(PhaseEvent::Fail("rejected".to_string())).unwrap();
    assert!(fsm.process(PhaseEvent::Fail("again".to_string())).is_err());
    assert_eq!(fsm.error(), Some("rejected"));
}
