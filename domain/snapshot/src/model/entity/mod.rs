mod account;
mod account_state;
mod snapshot;

#[rustfmt::skip]
pub use {
    account::Account,
    account_state::{
        AccountStatus, InProgressMarker, MarkerOwner, Phase, SkipReason, SnapshotOutcome, Trigger,
    },
    snapshot::Snapshot,
};
