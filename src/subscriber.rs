use codec::FixRecord;

/// Notified whenever a receiver's cached fix changes.
///
/// The aggregator holds a list of these behind `dyn FixSubscriber`, so a
/// plain closure is enough for most callers — see the blanket impl below.
pub trait FixSubscriber: Send + Sync {
    fn on_fix(&self, receiver_id: &str, fix: &FixRecord);
}

impl<F> FixSubscriber for F
where
    F: Fn(&str, &FixRecord) + Send + Sync,
{
    fn on_fix(&self, receiver_id: &str, fix: &FixRecord) {
        self(receiver_id, fix)
    }
}
