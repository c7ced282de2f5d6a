pub mod auth;
pub mod puller;
pub mod pusher;
pub mod supervisor;
pub mod table;

use std::time::Duration;

use rand::Rng;

pub use auth::{Auth, AuthError, ClientCredentials};
pub use puller::{Puller, PullerSettings};
pub use pusher::{PushError, PushOutcome, Pusher, PusherSettings};
pub use supervisor::Supervisor;
pub use table::StatusTable;

/// `base` plus a random delay in `[0, jitter)`, so loops sharing an
/// interval do not fire in lockstep.
pub(crate) fn jittered(base: Duration, jitter: Duration) -> Duration {
    let max = jitter.as_millis() as u64;
    if max == 0 {
        return base;
    }
    base + Duration::from_millis(rand::rng().random_range(0..max))
}
