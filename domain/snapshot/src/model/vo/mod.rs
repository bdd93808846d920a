mod admission;
mod event;
mod retention;
mod settings;
mod snapshot_id;

#[rustfmt::skip]
pub use {
    admission::*,
    event::*,
    retention::*,
    settings::*,
    snapshot_id::*,
};
