use serde::Serialize;

use crate::error::TransferError;

/// Phase of a transfer.
///
/// ```text
/// Created -> ResolvingNameSpace -> NameSpaceResolved -> SelectingPool -> PoolSelected
///         -> MoverStarting -> MoverRunning [-> MoverKilling] -> FinishedOk | FinishedError
/// ```
///
/// A failed remote step moves the transfer back to the last stable phase so
/// that the retry loop can repeat it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    Created,
    ResolvingNameSpace,
    NameSpaceResolved,
    SelectingPool,
    PoolSelected,
    MoverStarting,
    MoverRunning,
    MoverKilling,
    FinishedOk,
    FinishedError,
}

impl TransferState {
    /// Returns true once a mover outcome has been recorded.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::FinishedOk | Self::FinishedError)
    }
}

/// What waiters of a transfer observe about its mover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MoverOutcome {
    Pending,
    Finished(Result<(), TransferError>),
}

impl MoverOutcome {
    pub(crate) fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}
