use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Wall-clock source shared by the flows and the offline backend, so tests
/// can pin "now" to a known campus minute.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

pub fn fixed_clock(at: DateTime<Utc>) -> Clock {
    Arc::new(move || at)
}
