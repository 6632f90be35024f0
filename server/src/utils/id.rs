//! Message id generation

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of generated message ids
pub const ID_LENGTH: usize = 12;

/// Short opaque id: 12 random alphanumerics
pub fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect()
}
