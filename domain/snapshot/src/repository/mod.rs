mod account;
mod marker;

#[rustfmt::skip]
pub use {
    account::AccountRepo,
    marker::MarkerRepo,
};
