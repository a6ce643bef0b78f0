use serde::{Deserialize, Serialize};

/// The slice of an apartment this engine reads and writes. `is_free` is
/// derived from booking rows and only ever written by the availability reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Apartment {
    pub id: i64,
    pub owner_id: i64,
    pub is_free: bool,
}
