use landreg_client::{
    AssignmentView, ClientError, ControllerState, OptimisticController, RollbackReason,
};
use landreg_core::Slot;
use landreg_harness::{TestRegistry, aid, hid, init_test_logging, pid};

fn load_view(reg: &TestRegistry, target: &str, actor: &str) -> Result<AssignmentView, Box<dyn std::error::Error>> {
    let mut parcels = reg.engine.storage().parcels_in_village("Valea")?;
    parcels.extend(reg.engine.storage().parcels_in_village("Deal")?);
    Ok(AssignmentView::new(hid(target), aid(actor), &parcels))
}

fn view_matches_store(reg: &TestRegistry, view: &AssignmentView) -> Result<(), Box<dyn std::error::Error>> {
    for (id, parcel) in &view.parcels {
        let stored = reg.get(id.as_str())?;
        assert_eq!(parcel.owner, stored.owner, "owner of {id}");
        assert_eq!(parcel.cultivator, stored.cultivator, "cultivator of {id}");
    }
    Ok(())
}

#[test]
fn conflict_rolls_back_view_then_forced_retry_commits() -> Result<(), Box<dyn std::error::Error>> {
    init_test_logging();
    let mut reg = TestRegistry::two_mayors()?;
    reg.parcel("P1", "Valea", Some("F2"), None)?;
    reg.parcel("P2", "Deal", Some("F1"), None)?;

    let mut controller = OptimisticController::new(load_view(&reg, "F1", "M1")?);
    controller.toggle(Slot::Owner, pid("P1"))?;
    controller.toggle(Slot::Cultivator, pid("P2"))?;
    let before = rmp_serde::to_vec(controller.view())?;

    let state = controller.submit(&mut reg.engine)?.clone();
    let ControllerState::RolledBack(RollbackReason::Conflicts(prompt)) = state else {
        panic!("expected conflict rollback, got {state:?}");
    };
    assert_eq!(prompt.conflicts.len(), 1);
    assert_eq!(prompt.conflicts[0].incumbent_holder_name, "Maria Ionescu");
    assert!(prompt.retry.force);
    assert_eq!(rmp_serde::to_vec(controller.view())?, before);
    view_matches_store(&reg, controller.view())?;

    let state = controller.retry_with_force(&mut reg.engine)?;
    assert!(matches!(state, ControllerState::Committed { .. }), "{state:?}");
    assert_eq!(reg.slots("P1")?, (Some("F1".into()), None));
    assert_eq!(reg.slots("P2")?, (Some("F1".into()), Some("F1".into())));
    view_matches_store(&reg, controller.view())?;
    Ok(())
}

#[test]
fn optimistic_view_agrees_with_committed_state() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::two_mayors()?;
    reg.parcel("P1", "Valea", Some("F1"), Some("F1"))?;
    reg.parcel("P2", "Valea", None, None)?;
    reg.parcel("P3", "Deal", None, Some("F1"))?;

    let mut controller = OptimisticController::new(load_view(&reg, "F1", "M1")?);
    controller.toggle(Slot::Owner, pid("P1"))?;
    controller.toggle(Slot::Owner, pid("P2"))?;
    controller.toggle(Slot::Cultivator, pid("P3"))?;

    let request = controller.begin_submit(false)?;
    assert!(controller.is_submitting());
    // What the panel shows while the request is in flight...
    let optimistic = controller.view().clone();
    let response = reg.engine.assign(&request);
    let state = controller.complete(Ok(response))?;
    assert!(matches!(state, ControllerState::Committed { .. }));

    // ...is exactly what the registry holds afterwards.
    view_matches_store(&reg, &optimistic)?;
    assert_eq!(reg.slots("P1")?, (None, Some("F1".into())));
    assert_eq!(reg.slots("P2")?, (Some("F1".into()), None));
    assert_eq!(reg.slots("P3")?, (None, None));
    Ok(())
}

#[test]
fn persistence_failure_restores_view() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::two_mayors()?;
    reg.parcel("P1", "Valea", None, None)?;
    reg.parcel("P2", "Valea", Some("F1"), None)?;
    reg.engine.storage().conn().execute_batch(
        "CREATE TRIGGER frozen BEFORE UPDATE ON parcels
         BEGIN SELECT RAISE(ABORT, 'registry is read-only'); END;",
    )?;

    let mut controller = OptimisticController::new(load_view(&reg, "F1", "M1")?);
    controller.toggle(Slot::Owner, pid("P1"))?;
    let before = rmp_serde::to_vec(controller.view())?;

    let state = controller.submit(&mut reg.engine)?.clone();
    let ControllerState::RolledBack(RollbackReason::Failure(error)) = state else {
        panic!("expected failure rollback, got {state:?}");
    };
    assert!(error.contains("please retry"), "{error}");
    assert_eq!(rmp_serde::to_vec(controller.view())?, before);
    view_matches_store(&reg, controller.view())?;

    // A failure is not a conflict; there is nothing to force.
    assert!(controller.retry_with_force(&mut reg.engine).is_err());
    controller.acknowledge()?;
    assert_eq!(controller.state(), &ControllerState::Idle);
    Ok(())
}

#[test]
fn invalid_reference_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::two_mayors()?;
    reg.parcel("P1", "Valea", None, None)?;

    let mut controller = OptimisticController::new(load_view(&reg, "F1", "M1")?);
    controller.toggle(Slot::Owner, pid("P1"))?;
    // Deleted elsewhere after the panel loaded.
    controller.toggle(Slot::Owner, pid("P404"))?;
    let before = controller.view().clone();

    let state = controller.submit(&mut reg.engine)?;
    let ControllerState::RolledBack(RollbackReason::Failure(error)) = state else {
        panic!("expected failure rollback");
    };
    assert!(error.contains("P404"), "{error}");
    assert_eq!(controller.view(), &before);
    assert_eq!(reg.slots("P1")?, (None, None));
    Ok(())
}

#[test]
fn forced_retry_only_overrides_the_reported_conflicts() -> Result<(), Box<dyn std::error::Error>> {
    let mut reg = TestRegistry::two_mayors()?;
    reg.parcel("P1", "Valea", Some("F2"), None)?;
    reg.parcel("P2", "Valea", Some("F3"), None)?;

    let mut controller = OptimisticController::new(load_view(&reg, "F1", "M1")?);
    controller.toggle(Slot::Owner, pid("P1"))?;
    let state = controller.submit(&mut reg.engine)?;
    assert!(matches!(
        state,
        ControllerState::RolledBack(RollbackReason::Conflicts(_))
    ));

    // Ticking another occupied parcel now would slip it past the prompt.
    assert_eq!(
        controller.toggle(Slot::Owner, pid("P2")),
        Err(ClientError::ConflictPromptOpen)
    );

    let state = controller.retry_with_force(&mut reg.engine)?;
    assert!(matches!(state, ControllerState::Committed { .. }), "{state:?}");
    assert_eq!(reg.slots("P1")?, (Some("F1".into()), None));
    assert_eq!(reg.slots("P2")?, (Some("F3".into()), None));
    view_matches_store(&reg, controller.view())?;
    Ok(())
}
