use tokio::time::Instant;

/// Records "something changed" per account without touching storage.
///
/// Safe to call concurrently for the same account.
pub trait ActivityTracker: Send + Sync {
    fn record_activity(&self, account: &str, at: Instant);
    /// `None` means the account was never active.
    fn last_activity(&self, account: &str) -> Option<Instant>;
    /// Forget the account's activity if none was recorded after `upto`.
    ///
    /// Returns `false` when newer activity remains.
    fn clear_through(&self, account: &str, upto: Instant) -> bool;
}
