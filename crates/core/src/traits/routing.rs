use crate::{
    models::{Node, OperationArgs, OperationType, RoutingDecision},
    CoordinatorResult,
};

/// Maps an operation request onto a fan-out strategy and target set.
///
/// `eligible` is a point-in-time snapshot of the nodes that may receive work.
pub trait RoutingPolicy: Send + Sync {
    fn route(
        &self,
        operation_type: OperationType,
        args: &OperationArgs,
        eligible: &[Node],
    ) -> CoordinatorResult<RoutingDecision>;
}
