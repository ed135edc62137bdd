//! Optimistic submission of an assignment with all-or-nothing rollback.

use landreg_core::{AssignResponse, AssignmentRequest, Conflict, ParcelId, Slot};

use crate::error::ClientError;
use crate::gateway::{AssignmentGateway, TransportError};
use crate::view::AssignmentView;

/// Conflicts shown to the operator, with the request that overrides them.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictPrompt {
    pub conflicts: Vec<Conflict>,
    pub retry: AssignmentRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RollbackReason {
    Conflicts(ConflictPrompt),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
    Idle,
    Submitting,
    Committed { message: String },
    RolledBack(RollbackReason),
}

struct PendingSubmission {
    snapshot: AssignmentView,
    request: AssignmentRequest,
}

pub struct OptimisticController {
    view: AssignmentView,
    state: ControllerState,
    pending: Option<PendingSubmission>,
}

impl OptimisticController {
    pub fn new(view: AssignmentView) -> Self {
        Self {
            view,
            state: ControllerState::Idle,
            pending: None,
        }
    }

    pub fn view(&self) -> &AssignmentView {
        &self.view
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn is_submitting(&self) -> bool {
        self.state == ControllerState::Submitting
    }

    /// The panel is locked while a request is in flight and while a
    /// conflict prompt is open; `acknowledge` dismisses the prompt.
    pub fn toggle(&mut self, slot: Slot, parcel_id: ParcelId) -> Result<bool, ClientError> {
        self.ensure_editable()?;
        Ok(self.view.selection.toggle(slot, parcel_id))
    }

    /// Swap in freshly loaded parcels, e.g. after a commit.
    pub fn replace_view(&mut self, view: AssignmentView) -> Result<(), ClientError> {
        self.ensure_editable()?;
        self.view = view;
        Ok(())
    }

    fn ensure_editable(&self) -> Result<(), ClientError> {
        match &self.state {
            ControllerState::Submitting => Err(ClientError::SubmissionInFlight),
            ControllerState::RolledBack(RollbackReason::Conflicts(_)) => {
                Err(ClientError::ConflictPromptOpen)
            }
            _ => Ok(()),
        }
    }

    /// Snapshot the view, apply the desired state locally and hand back the
    /// request to send.
    pub fn begin_submit(&mut self, force: bool) -> Result<AssignmentRequest, ClientError> {
        if self.is_submitting() {
            return Err(ClientError::SubmissionInFlight);
        }
        let request = self.view.request(force);
        self.start(request.clone());
        Ok(request)
    }

    fn start(&mut self, request: AssignmentRequest) {
        let snapshot = self.view.clone();
        self.view.apply_optimistic();
        tracing::debug!(
            target_holder = %request.target,
            force = request.force,
            "assignment submitted"
        );
        self.pending = Some(PendingSubmission { snapshot, request });
        self.state = ControllerState::Submitting;
    }

    /// Settle the in-flight request. Anything but success restores the
    /// snapshot taken by `begin_submit`.
    pub fn complete(
        &mut self,
        result: Result<AssignResponse, TransportError>,
    ) -> Result<&ControllerState, ClientError> {
        let pending = self.pending.take().ok_or(ClientError::NothingInFlight)?;
        self.state = match result {
            Ok(AssignResponse::Success { message }) => ControllerState::Committed { message },
            Ok(AssignResponse::Conflicts { conflicts }) => {
                self.view = pending.snapshot;
                tracing::info!(conflicts = conflicts.len(), "optimistic assignment rolled back");
                ControllerState::RolledBack(RollbackReason::Conflicts(ConflictPrompt {
                    conflicts,
                    retry: pending.request.forced(),
                }))
            }
            Ok(AssignResponse::Failure { error }) => {
                self.view = pending.snapshot;
                tracing::warn!(%error, "optimistic assignment rolled back");
                ControllerState::RolledBack(RollbackReason::Failure(error))
            }
            Err(err) => {
                self.view = pending.snapshot;
                tracing::warn!(error = %err, "optimistic assignment rolled back");
                ControllerState::RolledBack(RollbackReason::Failure(err.to_string()))
            }
        };
        Ok(&self.state)
    }

    /// Submit the current selection and wait for the outcome.
    pub fn submit<G>(&mut self, gateway: &mut G) -> Result<&ControllerState, ClientError>
    where
        G: AssignmentGateway + ?Sized,
    {
        let request = self.begin_submit(false)?;
        let result = gateway.assign(&request);
        self.complete(result)
    }

    /// After a conflict rollback, send the request the operator was shown
    /// conflicts for, with `force`. Selection edits are refused while the
    /// prompt is open, so the view still matches that request.
    pub fn retry_with_force<G>(&mut self, gateway: &mut G) -> Result<&ControllerState, ClientError>
    where
        G: AssignmentGateway + ?Sized,
    {
        let ControllerState::RolledBack(RollbackReason::Conflicts(prompt)) = &self.state else {
            return Err(ClientError::NoConflictToOverride);
        };
        let request = prompt.retry.clone();
        self.start(request.clone());
        let result = gateway.assign(&request);
        self.complete(result)
    }

    /// Dismiss the outcome of the last submission.
    pub fn acknowledge(&mut self) -> Result<(), ClientError> {
        if self.is_submitting() {
            return Err(ClientError::SubmissionInFlight);
        }
        self.state = ControllerState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use landreg_core::{AuthorityId, HolderId, Parcel};

    fn pid(s: &str) -> ParcelId {
        ParcelId::new(s).unwrap()
    }

    fn hid(s: &str) -> HolderId {
        HolderId::new(s).unwrap()
    }

    /// Replays canned results and remembers what it was sent.
    struct ScriptedGateway {
        replies: VecDeque<Result<AssignResponse, TransportError>>,
        sent: Vec<AssignmentRequest>,
    }

    impl ScriptedGateway {
        fn new(replies: Vec<Result<AssignResponse, TransportError>>) -> Self {
            Self {
                replies: replies.into(),
                sent: Vec::new(),
            }
        }
    }

    impl AssignmentGateway for ScriptedGateway {
        fn assign(&mut self, request: &AssignmentRequest) -> Result<AssignResponse, TransportError> {
            self.sent.push(request.clone());
            self.replies
                .pop_front()
                .unwrap_or_else(|| Err(TransportError("no scripted reply".into())))
        }
    }

    fn controller() -> OptimisticController {
        let parcels = [
            Parcel::new(pid("P1"), "Valea", 1.0).unwrap().with_owner(Some(hid("F2"))),
            Parcel::new(pid("P2"), "Valea", 2.0).unwrap().with_owner(Some(hid("F1"))),
        ];
        let mut controller = OptimisticController::new(AssignmentView::new(
            hid("F1"),
            AuthorityId::new("M1").unwrap(),
            &parcels,
        ));
        controller.toggle(Slot::Owner, pid("P1")).unwrap();
        controller
    }

    fn conflict() -> Conflict {
        Conflict {
            parcel_id: pid("P1"),
            village: "Valea".into(),
            slot: Slot::Owner,
            incumbent_holder_id: hid("F2"),
            incumbent_holder_name: "Maria Ionescu".into(),
            target_holder_id: hid("F1"),
            target_holder_name: "Ion Popescu".into(),
        }
    }

    #[test]
    fn success_keeps_the_optimistic_state() {
        let mut controller = controller();
        let mut gateway = ScriptedGateway::new(vec![Ok(AssignResponse::Success {
            message: "ok".into(),
        })]);

        let state = controller.submit(&mut gateway).unwrap().clone();
        assert_eq!(state, ControllerState::Committed { message: "ok".into() });
        assert_eq!(controller.view().parcels[&pid("P1")].owner, Some(hid("F1")));
        assert!(controller.view().selection.is_empty());
    }

    #[test]
    fn conflicts_restore_snapshot_and_offer_forced_retry() {
        let mut controller = controller();
        let before = controller.view().clone();
        let mut gateway = ScriptedGateway::new(vec![
            Ok(AssignResponse::Conflicts {
                conflicts: vec![conflict()],
            }),
            Ok(AssignResponse::Success {
                message: "forced".into(),
            }),
        ]);

        controller.submit(&mut gateway).unwrap();
        assert_eq!(controller.view(), &before);
        let ControllerState::RolledBack(RollbackReason::Conflicts(prompt)) = controller.state() else {
            panic!("expected conflict rollback, got {:?}", controller.state());
        };
        assert_eq!(prompt.conflicts, vec![conflict()]);
        assert!(prompt.retry.force);

        controller.retry_with_force(&mut gateway).unwrap();
        assert!(matches!(controller.state(), ControllerState::Committed { .. }));
        assert!(!gateway.sent[0].force);
        assert!(gateway.sent[1].force);
        assert_eq!(gateway.sent[1].desired_owned, gateway.sent[0].desired_owned);
    }

    #[test]
    fn transport_error_rolls_back_like_a_failure() {
        let mut controller = controller();
        let before = controller.view().clone();
        let mut gateway = ScriptedGateway::new(vec![Err(TransportError("connection reset".into()))]);

        controller.submit(&mut gateway).unwrap();
        assert_eq!(controller.view(), &before);
        assert_eq!(
            controller.state(),
            &ControllerState::RolledBack(RollbackReason::Failure(
                "transport error: connection reset".into()
            ))
        );
    }

    #[test]
    fn one_request_in_flight_and_panel_locked() {
        let mut controller = controller();
        controller.begin_submit(false).unwrap();

        assert_eq!(controller.begin_submit(false), Err(ClientError::SubmissionInFlight));
        assert_eq!(
            controller.toggle(Slot::Cultivator, pid("P2")),
            Err(ClientError::SubmissionInFlight)
        );
        assert_eq!(controller.acknowledge(), Err(ClientError::SubmissionInFlight));

        controller
            .complete(Ok(AssignResponse::Failure {
                error: "could not save the assignment, please retry".into(),
            }))
            .unwrap();
        assert!(!controller.is_submitting());
        assert_eq!(
            controller.complete(Ok(AssignResponse::Success { message: String::new() })),
            Err(ClientError::NothingInFlight)
        );
    }

    #[test]
    fn forced_retry_needs_a_conflict_rollback() {
        let mut controller = controller();
        let mut gateway = ScriptedGateway::new(Vec::new());
        assert_eq!(
            controller.retry_with_force(&mut gateway).map(|_| ()),
            Err(ClientError::NoConflictToOverride)
        );
        assert!(gateway.sent.is_empty());
    }

    #[test]
    fn forced_retry_resends_the_prompted_request() {
        let mut controller = controller();
        let mut gateway = ScriptedGateway::new(vec![
            Ok(AssignResponse::Conflicts {
                conflicts: vec![conflict()],
            }),
            Ok(AssignResponse::Success {
                message: "forced".into(),
            }),
        ]);

        controller.submit(&mut gateway).unwrap();
        let ControllerState::RolledBack(RollbackReason::Conflicts(prompt)) = controller.state().clone()
        else {
            panic!("expected conflict rollback");
        };
        assert_eq!(
            controller.toggle(Slot::Cultivator, pid("P1")),
            Err(ClientError::ConflictPromptOpen)
        );
        assert_eq!(
            controller.replace_view(controller.view().clone()),
            Err(ClientError::ConflictPromptOpen)
        );

        controller.retry_with_force(&mut gateway).unwrap();
        assert_eq!(gateway.sent[1], prompt.retry);
        assert_eq!(controller.view().parcels[&pid("P1")].owner, Some(hid("F1")));
        assert_eq!(controller.view().parcels[&pid("P1")].cultivator, None);
    }

    #[test]
    fn dismissing_conflicts_unlocks_the_panel() {
        let mut controller = controller();
        let mut gateway = ScriptedGateway::new(vec![Ok(AssignResponse::Conflicts {
            conflicts: vec![conflict()],
        })]);

        controller.submit(&mut gateway).unwrap();
        controller.acknowledge().unwrap();
        assert_eq!(controller.toggle(Slot::Cultivator, pid("P1")), Ok(true));
        assert_eq!(
            controller.retry_with_force(&mut gateway).map(|_| ()),
            Err(ClientError::NoConflictToOverride)
        );
        assert_eq!(gateway.sent.len(), 1);
    }
}
